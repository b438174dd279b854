//! Invocation adapters: turn one request into one call of a user function
//! and the call's outcome into a response.
//!
//! Every adapter runs user code through [`run_isolated`], the only place a
//! panic in a user function is caught.

use super::logging::RequestIds;
use crate::event::{
    convert_background_to_cloud_event_request, convert_cloud_event_to_background_request,
    get_background_event, is_cloud_event, CloudEvent, EventError,
};
use crate::function::{
    CloudEventFunction, Context, DynCallback, FunctionKind, HttpFunction, Invocation, Outcome,
    RegisteredFunction,
};
use crate::http::{FunctionRequest, FunctionResponse, FunctionStatus, StatusCode, FUNCTION_STATUS_HEADER};
use bytes::Bytes;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, Instrument};

/// Response body for a panicking function. Details only go to the logs.
pub const PANIC_MESSAGE: &str =
    "A panic occurred during user function execution. Please see logs for more details.";

/// Build a failure response and copy its message to the error log.
fn fail(status: StatusCode, function_status: FunctionStatus, message: String) -> FunctionResponse {
    error!("{}", message.trim_end());
    FunctionResponse::failure(status, function_status, message)
}

fn panic_payload(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

thread_local! {
    // Set while a user future is being polled on this thread.
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install a panic hook that records a backtrace for panics raised inside
/// user functions. Other panics go to the previous hook.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            } else {
                previous(info);
            }
        }));
    });
}

/// A panic raised by user code.
#[derive(Debug)]
struct PanicReport {
    message: String,
    backtrace: Option<Backtrace>,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PANIC_MESSAGE}: {}", self.message)?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n\n{backtrace}")?;
        }
        Ok(())
    }
}

/// Polls a future, turning a panic into a [`PanicReport`].
struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for CatchPanic<F> {
    type Output = Result<F::Output, PanicReport>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let was_capturing = CAPTURING.with(|c| c.replace(true));
        let polled = panic::catch_unwind(AssertUnwindSafe(|| self.inner.as_mut().poll(cx)));
        CAPTURING.with(|c| c.set(was_capturing));

        match polled {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(PanicReport {
                message: panic_payload(payload.as_ref()).to_string(),
                backtrace: LAST_BACKTRACE.with(|slot| slot.borrow_mut().take()),
            })),
        }
    }
}

/// Run `fut` to completion, catching a panic together with its backtrace.
async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PanicReport> {
    install_panic_hook();
    CatchPanic {
        inner: Box::pin(fut),
    }
    .await
}

fn crash_response() -> FunctionResponse {
    FunctionResponse::failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        FunctionStatus::Crash,
        PANIC_MESSAGE,
    )
}

/// Run user code on its own task so a panic is contained to this request.
///
/// The panic message and backtrace go to the error log; the response only
/// carries the generic message.
pub async fn run_isolated<F, T>(fut: F) -> Result<T, FunctionResponse>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(catch_panic(fut).in_current_span()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(report)) => {
            error!("{}", report);
            Err(crash_response())
        }
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            error!("{}: {}", PANIC_MESSAGE, panic_payload(payload.as_ref()));
            Err(crash_response())
        }
        Err(err) => Err(fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            FunctionStatus::Crash,
            format!("Function task failed: {err}"),
        )),
    }
}

/// A registered function bound to a route, ready to serve requests.
#[derive(Debug, Clone)]
pub struct Invoker {
    function: RegisteredFunction,
    timeout: Option<Duration>,
}

impl Invoker {
    pub fn new(function: RegisteredFunction, timeout: Option<Duration>) -> Self {
        Self { function, timeout }
    }

    pub fn function(&self) -> &RegisteredFunction {
        &self.function
    }

    fn context(&self, ids: &RequestIds) -> Context {
        let mut ctx = Context::new(self.function.display_name(), ids.execution_id.clone());
        ctx.trace_id = ids.trace_id.clone();
        ctx.span_id = ids.span_id.clone();
        ctx.sampled = ids.sampled;
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_deadline(Instant::now() + timeout);
        }
        ctx
    }

    /// Serve one request.
    pub async fn invoke(&self, req: FunctionRequest) -> FunctionResponse {
        let ids = RequestIds::from_request(&req);
        let span = ids.span(self.function.display_name());
        let ctx = self.context(&ids);

        async move {
            debug!("Serving {} function", self.function.kind.as_str());
            match &self.function.kind {
                FunctionKind::Http(f) => invoke_http(f.clone(), req, ctx).await,
                FunctionKind::CloudEvent(f) => invoke_cloud_event(f.clone(), req, ctx).await,
                FunctionKind::Event(cb) => invoke_event(cb, req, ctx).await,
                FunctionKind::Typed(cb) => invoke_typed(cb, req, ctx).await,
            }
        }
        .instrument(span)
        .await
    }
}

async fn invoke_http(
    f: Arc<dyn HttpFunction>,
    req: FunctionRequest,
    ctx: Context,
) -> FunctionResponse {
    match run_isolated(async move { f.handle(req, ctx).await }).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            error!("Function error: {}", err);
            err.into()
        }
        Err(crash) => crash,
    }
}

fn conversion_failure(err: EventError) -> FunctionResponse {
    fail(err.status_code(), FunctionStatus::Crash, err.to_string())
}

async fn invoke_cloud_event(
    f: Arc<dyn CloudEventFunction>,
    mut req: FunctionRequest,
    ctx: Context,
) -> FunctionResponse {
    let announced = req.has_header("ce-id")
        || req
            .get_header("content-type")
            .is_some_and(|ct| ct.contains("cloudevents"));
    if !announced {
        if let Err(err) = convert_background_to_cloud_event_request(&mut req) {
            return conversion_failure(err);
        }
    }

    let event = match CloudEvent::from_request(&req) {
        Ok(event) => event,
        Err(err) => return fail(StatusCode::BAD_REQUEST, FunctionStatus::Crash, err.to_string()),
    };

    match run_isolated(async move { f.receive(ctx, event).await }).await {
        Ok(Ok(())) => FunctionResponse::ok(),
        Ok(Err(err)) => {
            error!("Function error: {}", err);
            FunctionResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
                .header(FUNCTION_STATUS_HEADER, FunctionStatus::Error.as_str())
        }
        Err(crash) => crash,
    }
}

async fn invoke_event(cb: &DynCallback, mut req: FunctionRequest, ctx: Context) -> FunctionResponse {
    if is_cloud_event(&req) {
        if let Err(err) = convert_cloud_event_to_background_request(&mut req) {
            return conversion_failure(err);
        }
    }

    let body = req.body.clone().unwrap_or_default();
    let (ctx, data) = match get_background_event(&body, req.path()) {
        Err(err) => {
            return fail(
                StatusCode::BAD_REQUEST,
                FunctionStatus::Crash,
                format!(
                    "Error: {}, parsing background event: {}",
                    err,
                    String::from_utf8_lossy(&body)
                ),
            )
        }
        Ok(Some(event)) => match serde_json::to_vec(&event.data) {
            Ok(data) => (ctx.with_metadata(event.metadata), Bytes::from(data)),
            Err(err) => {
                return fail(
                    StatusCode::BAD_REQUEST,
                    FunctionStatus::Crash,
                    format!("Unable to encode data {}: {}", event.data, err),
                )
            }
        },
        Ok(None) => (ctx, body),
    };

    let invocation = Invocation { ctx, data };
    let call = match cb.prepare(&invocation) {
        Ok(call) => call,
        Err(err) => {
            return fail(
                StatusCode::BAD_REQUEST,
                FunctionStatus::Crash,
                format!(
                    "Error: {}, while converting event data: {}",
                    err,
                    String::from_utf8_lossy(&invocation.data)
                ),
            )
        }
    };

    match run_isolated(call).await {
        Ok(outcome) => outcome_response(outcome),
        Err(crash) => crash,
    }
}

async fn invoke_typed(cb: &DynCallback, req: FunctionRequest, ctx: Context) -> FunctionResponse {
    let invocation = Invocation {
        ctx,
        data: req.body.unwrap_or_default(),
    };
    let call = match cb.prepare(&invocation) {
        Ok(call) => call,
        Err(err) => {
            return fail(
                StatusCode::BAD_REQUEST,
                FunctionStatus::Crash,
                format!(
                    "Error: {}, while converting input data: {}",
                    err,
                    String::from_utf8_lossy(&invocation.data)
                ),
            )
        }
    };

    match run_isolated(call).await {
        Ok(outcome) => outcome_response(outcome),
        Err(crash) => crash,
    }
}

fn outcome_response(outcome: Outcome) -> FunctionResponse {
    match outcome {
        Outcome::Empty => FunctionResponse::ok(),
        Outcome::Value(body) => FunctionResponse::ok()
            .header("Content-Type", "application/json")
            .body(body),
        Outcome::Failed(message) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            FunctionStatus::Error,
            format!("Function error: {message}"),
        ),
        Outcome::Unencodable(err) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            FunctionStatus::Crash,
            format!("Unable to encode function result: {err}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{with_name, FunctionError, Json, Registry};
    use crate::http::Method;
    use serde::Deserialize;
    use serde_json::json;

    fn invoker(registry: &Registry, name: &str) -> Invoker {
        Invoker::new(registry.get_registered_function(name).unwrap().clone(), None)
    }

    fn post(body: impl Into<Bytes>) -> FunctionRequest {
        FunctionRequest::new(Method::Post, "/").body(body)
    }

    #[derive(Debug, Deserialize)]
    struct Payload {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn test_run_isolated_contains_panic() {
        let result: Result<(), _> = run_isolated(async { panic!("boom") }).await;
        let resp = result.unwrap_err();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.function_status(), Some("crash"));
        let body = resp.text_body().unwrap();
        assert_eq!(body, format!("{PANIC_MESSAGE}\n"));
        assert!(!body.contains("boom"));
        assert!(!body.contains("run_isolated"));
    }

    #[tokio::test]
    async fn test_catch_panic_records_backtrace() {
        let report = catch_panic(async {
            tokio::task::yield_now().await;
            panic!("boom after {}", 1);
        })
        .await
        .map(|_: ()| ())
        .unwrap_err();
        assert_eq!(report.message, "boom after 1");
        assert!(report.backtrace.is_some());

        let logged = report.to_string();
        assert!(logged.starts_with(&format!("{PANIC_MESSAGE}: boom after 1\n\n")));
    }

    #[tokio::test]
    async fn test_catch_panic_passes_values_through() {
        assert_eq!(catch_panic(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_http_error_sets_status_header() {
        let mut registry = Registry::new();
        registry
            .register_http(
                |_req: FunctionRequest, _ctx: Context| async {
                    Err::<FunctionResponse, _>(FunctionError::with_code(503, "down"))
                },
                with_name("down"),
            )
            .unwrap();
        let resp = invoker(&registry, "down").invoke(post("")).await;
        assert_eq!(resp.status.0, 503);
        assert_eq!(resp.function_status(), Some("error"));
    }

    #[tokio::test]
    async fn test_event_function_receives_metadata() {
        let mut registry = Registry::new();
        registry
            .register_event(
                |ctx: Context, Json(data): Json<serde_json::Value>| async move {
                    let metadata = ctx.metadata().ok_or("no metadata")?;
                    if metadata.event_id != "1" || data != json!({"a": 1}) {
                        return Err("unexpected event");
                    }
                    Ok(())
                },
                with_name("event"),
            )
            .unwrap();
        let resp = invoker(&registry, "event")
            .invoke(post(
                r#"{"context": {"eventId": "1", "eventType": "t"}, "data": {"a": 1}}"#,
            ))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.function_status(), None);
    }

    #[tokio::test]
    async fn test_event_function_plain_body_and_errors() {
        let mut registry = Registry::new();
        registry
            .register_event(
                |_ctx: Context, Json(p): Json<Payload>| async move {
                    if p.id < 0 {
                        return Err(format!("negative id for {}", p.name));
                    }
                    Ok(())
                },
                with_name("event"),
            )
            .unwrap();
        let f = invoker(&registry, "event");

        let resp = f.invoke(post(r#"{"id": 1, "name": "a"}"#)).await;
        assert_eq!(resp.status, StatusCode::OK);

        let resp = f.invoke(post(r#"{"id": -1, "name": "a"}"#)).await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.function_status(), Some("error"));
        assert_eq!(resp.text_body(), Some("Function error: negative id for a\n".to_string()));

        let resp = f.invoke(post(r#"{"id": "x"}"#)).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.function_status(), Some("crash"));
        assert!(resp.text_body().unwrap().contains("while converting event data"));

        let resp = f.invoke(post("{not json")).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert!(resp.text_body().unwrap().contains("parsing background event"));
    }

    #[tokio::test]
    async fn test_typed_function() {
        let mut registry = Registry::new();
        registry
            .register_typed(
                |Json(p): Json<Payload>| async move {
                    if p.name.is_empty() {
                        return Err("empty name");
                    }
                    Ok(json!({"id": p.id + 1, "name": p.name}))
                },
                with_name("typed"),
            )
            .unwrap();
        let f = invoker(&registry, "typed");

        let resp = f.invoke(post(r#"{"id": 1, "name": "a"}"#)).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.json_body::<serde_json::Value>().unwrap().unwrap(),
            json!({"id": 2, "name": "a"})
        );

        let resp = f.invoke(post(r#"{"id": 1, "name": ""}"#)).await;
        assert_eq!(resp.function_status(), Some("error"));

        let resp = f.invoke(post(r#"{"id": 12345, "name": 5}"#)).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.function_status(), Some("crash"));
        assert!(resp.text_body().unwrap().contains("while converting input data"));
    }

    #[tokio::test]
    async fn test_cloud_event_function_error_has_empty_body() {
        let mut registry = Registry::new();
        registry
            .register_cloud_event(
                |_ctx: Context, _event: CloudEvent| async { Err::<(), _>("rejected") },
                with_name("ce"),
            )
            .unwrap();
        let resp = invoker(&registry, "ce")
            .invoke(
                post("{}")
                    .header("ce-id", "1")
                    .header("ce-source", "s")
                    .header("ce-type", "t")
                    .header("ce-specversion", "1.0"),
            )
            .await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.function_status(), Some("error"));
        assert!(resp.body.is_none());
    }

    #[tokio::test]
    async fn test_deadline_attached_from_timeout() {
        let mut registry = Registry::new();
        registry
            .register_http(
                |_req: FunctionRequest, ctx: Context| async move {
                    match ctx.deadline() {
                        Some(_) => Ok(FunctionResponse::text("deadline")),
                        None => Err(FunctionError::new("no deadline")),
                    }
                },
                with_name("d"),
            )
            .unwrap();
        let function = registry.get_registered_function("d").unwrap().clone();

        let with = Invoker::new(function.clone(), Some(Duration::from_secs(60)));
        assert_eq!(with.invoke(post("")).await.status, StatusCode::OK);

        let without = Invoker::new(function, None);
        assert_eq!(
            without.invoke(post("")).await.status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
