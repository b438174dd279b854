//! HTTP types exchanged between the server, the adapters and user functions.

mod request;
mod response;

pub use request::{FunctionRequest, Method};
pub use response::{FunctionResponse, FunctionStatus, StatusCode, FUNCTION_STATUS_HEADER};
