//! Startup errors: registering functions and building the server.

use crate::function::SignatureError;
use thiserror::Error;

/// Failure to register a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("either path or name required")]
    MissingNameAndPath,

    #[error("function name already registered: {0}")]
    DuplicateName(String),

    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),
}

/// Failure to build or run the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no matching function found with name: {0:?}")]
    NoMatchingFunction(String),

    #[error("route already bound: {0}")]
    DuplicateRoute(String),

    #[error("invalid listen address {0}")]
    Addr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
