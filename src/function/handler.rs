//! Function context and the handler traits for HTTP and CloudEvent functions.

use crate::event::{CloudEvent, Metadata};
use crate::http::{FunctionRequest, FunctionResponse, FunctionStatus};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Boxed error returned by CloudEvent functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-invocation context handed to user functions.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Name the function was registered under, or its path when unnamed.
    pub function_name: String,
    /// Execution id, from `Function-Execution-Id` or generated.
    pub execution_id: String,
    /// Trace id from `X-Cloud-Trace-Context`.
    pub trace_id: Option<String>,
    /// Span id from `X-Cloud-Trace-Context`.
    pub span_id: Option<String>,
    /// Sampling decision from `X-Cloud-Trace-Context`.
    pub sampled: Option<bool>,
    metadata: Option<Arc<Metadata>>,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a new context.
    pub fn new(function_name: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            execution_id: execution_id.into(),
            ..Default::default()
        }
    }

    /// Attach background event metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    /// Attach a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Background event metadata, when the invocation came from an event.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed. Always false without a deadline.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the deadline passes; never resolves without one.
    ///
    /// The runtime does not abort functions at the deadline. Functions that
    /// want to stop early select on this.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// An HTTP function.
///
/// Implemented for any async closure taking `(FunctionRequest, Context)`.
#[async_trait]
pub trait HttpFunction: Send + Sync {
    /// Handle one request.
    async fn handle(
        &self,
        request: FunctionRequest,
        ctx: Context,
    ) -> Result<FunctionResponse, FunctionError>;
}

#[async_trait]
impl<F, Fut> HttpFunction for F
where
    F: Fn(FunctionRequest, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FunctionResponse, FunctionError>> + Send + 'static,
{
    async fn handle(
        &self,
        request: FunctionRequest,
        ctx: Context,
    ) -> Result<FunctionResponse, FunctionError> {
        (self)(request, ctx).await
    }
}

/// A CloudEvent function.
///
/// Implemented for any async closure taking `(Context, CloudEvent)` and
/// returning `Result<(), E>` where `E` converts into [`BoxError`].
#[async_trait]
pub trait CloudEventFunction: Send + Sync {
    async fn receive(&self, ctx: Context, event: CloudEvent) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut, E> CloudEventFunction for F
where
    F: Fn(Context, CloudEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    async fn receive(&self, ctx: Context, event: CloudEvent) -> Result<(), BoxError> {
        (self)(ctx, event).await.map_err(Into::into)
    }
}

/// Error returned by HTTP functions.
#[derive(Debug, Clone)]
pub struct FunctionError {
    /// Error message.
    pub message: String,
    /// HTTP status code.
    pub code: u16,
}

impl FunctionError {
    /// Create a new error with status 500.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 500,
        }
    }

    /// Create an error with a specific code.
    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(404, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(400, message)
    }
}

impl std::fmt::Display for FunctionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for FunctionError {}

impl From<FunctionError> for FunctionResponse {
    fn from(err: FunctionError) -> Self {
        FunctionResponse::failure(err.code, FunctionStatus::Error, err.message)
    }
}

impl From<serde_json::Error> for FunctionError {
    fn from(err: serde_json::Error) -> Self {
        FunctionError::bad_request(err.to_string())
    }
}
