//! Runtime: configuration, routing, invocation and the HTTP server.

pub mod adapter;
pub mod config;
pub mod logging;
pub mod router;
mod server;

pub use adapter::{run_isolated, Invoker, PANIC_MESSAGE};
pub use config::{LogFormat, ServerConfig};
pub use logging::{init_tracing, RequestIds};
pub use router::{Route, Router};
pub use server::{BoundServer, FunctionServer};
