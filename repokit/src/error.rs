//! Crate-level error type
//!
//! Repository operations return [`RepositoryError`] directly. This type wraps
//! it together with the failures of the surrounding plumbing (configuration
//! and tracing setup) so applications can use one `Result` at their edges.

use thiserror::Error;

use crate::repository::RepositoryError;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Repository or unit-of-work error
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Tracing subscriber could not be installed
    #[error("Tracing error: {0}")]
    Tracing(String),
}

impl Error {
    /// The repository error, if this is one
    pub fn as_repository(&self) -> Option<&RepositoryError> {
        match self {
            Error::Repository(err) => Some(err),
            _ => None,
        }
    }
}

// Manual From implementation for the boxed error
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
