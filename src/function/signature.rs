//! Registration-time checks on callback shapes.

use super::callback::{ParamKind, ReturnKind, Signature};
use thiserror::Error;

/// A callback whose shape does not fit its function kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("expected function to have two parameters, found {0}")]
    EventParamCount(usize),

    #[error("expected function to return only an error")]
    EventReturn,

    #[error("expected first parameter to be Context")]
    EventFirstParam,

    #[error("expected function to have one parameter, found {0}")]
    TypedParamCount(usize),

    #[error("expected function to have at most two return values, found {0}")]
    TypedReturnCount(usize),

    #[error("expected last return value to be an error")]
    TypedLastReturn,
}

/// Event functions take `(Context, data)` and return only an error.
pub fn validate_event_function(signature: &Signature) -> Result<(), SignatureError> {
    if signature.params.len() != 2 {
        return Err(SignatureError::EventParamCount(signature.params.len()));
    }
    if signature.returns != [ReturnKind::Error] {
        return Err(SignatureError::EventReturn);
    }
    if signature.params[0] != ParamKind::Context {
        return Err(SignatureError::EventFirstParam);
    }
    Ok(())
}

/// Typed functions take one input and return up to two values, the last an error.
pub fn validate_typed_function(signature: &Signature) -> Result<(), SignatureError> {
    if signature.params.len() != 1 {
        return Err(SignatureError::TypedParamCount(signature.params.len()));
    }
    match signature.returns.as_slice() {
        [] => Ok(()),
        returns if returns.len() > 2 => Err(SignatureError::TypedReturnCount(returns.len())),
        [.., ReturnKind::Error] => Ok(()),
        _ => Err(SignatureError::TypedLastReturn),
    }
}
