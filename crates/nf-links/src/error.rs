use thiserror::Error;

pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Initialization failure in {link}: {cause}")]
    InitFailure { link: String, cause: &'static str },

    #[error("Input argument out of range for {link}: {what}")]
    OutOfBounds { link: String, what: &'static str },
}
