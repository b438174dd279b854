//! Tracing setup and request-scoped logging identifiers.

use super::config::LogFormat;
use crate::http::FunctionRequest;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Span;
use tracing_subscriber::EnvFilter;

pub const EXECUTION_ID_HEADER: &str = "Function-Execution-Id";
pub const TRACE_CONTEXT_HEADER: &str = "X-Cloud-Trace-Context";

// TRACE_ID/SPAN_ID;o=SAMPLED, every part optional.
static TRACE_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-f\d]+)?(?:/([a-f\d]+))?(?:;o=(\d))?").expect("trace context pattern compiles")
});

/// Initialize the global tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already initialized");
    }
}

/// Identifiers correlating log lines with one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIds {
    pub execution_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub sampled: Option<bool>,
}

impl RequestIds {
    /// Read the ids from request headers, generating an execution id when
    /// the caller sent none.
    pub fn from_request(req: &FunctionRequest) -> Self {
        let execution_id = req
            .get_header(EXECUTION_ID_HEADER)
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(generate_execution_id);
        let (trace_id, span_id, sampled) = req
            .get_header(TRACE_CONTEXT_HEADER)
            .map(|value| parse_trace_context(value))
            .unwrap_or_default();
        Self {
            execution_id,
            trace_id,
            span_id,
            sampled,
        }
    }

    /// A span carrying the ids, entered for the duration of an invocation.
    pub fn span(&self, function: &str) -> Span {
        tracing::info_span!(
            "invocation",
            function = %function,
            execution_id = %self.execution_id,
            trace_id = self.trace_id.as_deref().unwrap_or(""),
            span_id = self.span_id.as_deref().unwrap_or(""),
        )
    }
}

/// Split `TRACE_ID/SPAN_ID;o=SAMPLED`. A span id of `0` means none.
pub fn parse_trace_context(value: &str) -> (Option<String>, Option<String>, Option<bool>) {
    let Some(caps) = TRACE_CONTEXT.captures(value) else {
        return (None, None, None);
    };
    let trace_id = caps.get(1).map(|m| m.as_str().to_string());
    let span_id = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|s| s != "0");
    let sampled = caps.get(3).map(|m| m.as_str() == "1");
    (trace_id, span_id, sampled)
}

/// Generate a unique execution id.
pub fn generate_execution_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:x}", timestamp)
}
