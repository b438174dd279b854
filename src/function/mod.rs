//! User function kinds, their context, and the registry holding them.

pub mod callback;
pub mod handler;
pub mod registry;
pub mod signature;

pub use callback::{Callback, DynCallback, FunctionOutput, Invocation, Json, Outcome, Param, Signature};
pub use handler::{BoxError, CloudEventFunction, Context, FunctionError, HttpFunction};
pub use registry::{
    default_registry, with_name, with_path, FunctionKind, FunctionOptions, RegisteredFunction,
    Registry,
};
pub use signature::SignatureError;
