use thiserror::Error;

pub type SolverResult<T> = Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Invalid solver configuration for {name}: {what}")]
    InvalidConfig { name: String, what: &'static str },

    #[error("Solver {name} used before initialization")]
    NotInitialized { name: String },
}
