use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Solver(#[from] nf_solver::SolverError),

    #[error(transparent)]
    Link(#[from] nf_links::LinkError),

    #[error(transparent)]
    Fluid(#[from] nf_fluids::FluidError),

    #[error("Network {name} used before initialization")]
    NotInitialized { name: String },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
