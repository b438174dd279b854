//! # fnframe - a functions framework
//!
//! fnframe serves user functions over HTTP. A function is registered once
//! under a name or a path and the server adapts every inbound request to
//! the function's kind:
//!
//! - **HTTP** functions see the raw request and build the response.
//! - **CloudEvent** functions receive a decoded [`CloudEvent`], whether the
//!   caller sent a CloudEvent (binary or structured) or a legacy background
//!   event.
//! - **Event** functions receive a [`Context`] carrying event metadata and
//!   the event payload decoded into their own type, whether the caller sent
//!   a background event, a CloudEvent, or a bare JSON payload.
//! - **Typed** functions take one JSON-decoded input and return a
//!   JSON-encoded output.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          FunctionServer                             │
//! │               (hyper HTTP/1, buffered request bodies)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Router                                 │
//! │     target mode: one function at "/"   |   all functions by path    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             Invoker                                 │
//! │  ┌──────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────┐         │
//! │  │   HTTP   │  │  CloudEvent  │  │  Event   │  │  Typed   │         │
//! │  └──────────┘  └──────────────┘  └──────────┘  └──────────┘         │
//! │        event normalization · panic isolation · status headers       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fnframe::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     id: u64,
//! }
//!
//! #[derive(Serialize)]
//! struct Receipt {
//!     id: u64,
//!     accepted: bool,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     fnframe::functions::http("hello", |_req: FunctionRequest, _ctx: Context| async {
//!         Ok::<_, FunctionError>(FunctionResponse::text("Hello, World!"))
//!     });
//!     fnframe::functions::typed("order", |Json(order): Json<Order>| async move {
//!         Ok::<_, String>(Receipt { id: order.id, accepted: true })
//!     });
//!
//!     let config = ServerConfig::from_env();
//!     init_tracing(config.log_format);
//!     FunctionServer::from_default_registry(config)?.run().await
//! }
//! ```
//!
//! ## Failure reporting
//!
//! A failed invocation carries an `X-Google-Status` header: `error` when
//! the function reported an error, `crash` when the request could not be
//! decoded or the function panicked. A panic is contained to its request.

pub mod error;
pub mod event;
pub mod function;
pub mod functions;
pub mod http;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::error::{RegistrationError, ServerError};
    pub use crate::event::{CloudEvent, Metadata};
    pub use crate::function::{
        with_name, with_path, BoxError, CloudEventFunction, Context, FunctionError, HttpFunction,
        Json, Registry,
    };
    pub use crate::http::{FunctionRequest, FunctionResponse, Method, StatusCode};
    pub use crate::runtime::{init_tracing, FunctionServer, ServerConfig};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use error::{RegistrationError, ServerError};
pub use event::CloudEvent;
pub use function::{Context, FunctionError, Json, Registry};
pub use http::{FunctionRequest, FunctionResponse};
pub use runtime::{FunctionServer, ServerConfig};
