use thiserror::Error;

pub type FluidResult<T> = Result<T, FluidError>;

#[derive(Error, Debug)]
pub enum FluidError {
    #[error("Invalid fluid configuration: {what}")]
    InvalidConfig { what: &'static str },

    #[error("Invalid fluid state for {who}: {what}")]
    InvalidState { who: String, what: &'static str },

    #[error("Input argument out of range: {what}")]
    OutOfBounds { what: &'static str },
}
