//! HTTP server serving registered functions.

use super::config::ServerConfig;
use super::router::Router;
use crate::error::ServerError;
use crate::function::{default_registry, Registry};
use crate::http::{FunctionRequest, FunctionResponse, FunctionStatus, Method, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Function server.
///
/// The route table is fixed when the server is built; registering more
/// functions afterwards has no effect on it.
pub struct FunctionServer {
    config: ServerConfig,
    router: Arc<Router>,
}

impl FunctionServer {
    /// Create a server with a prepared router.
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router: Arc::new(router),
        }
    }

    /// Create a server for the functions in `registry`.
    pub fn from_registry(config: ServerConfig, registry: &Registry) -> Result<Self, ServerError> {
        let router = Router::from_registry(registry, &config)?;
        Ok(Self::new(config, router))
    }

    /// Create a server for the functions in the default registry.
    pub fn from_default_registry(config: ServerConfig) -> Result<Self, ServerError> {
        let registry = default_registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Self::from_registry(config, &registry)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr: SocketAddr = self
            .config
            .bind_addr()
            .parse()
            .map_err(|_| ServerError::Addr(self.config.bind_addr()))?;
        let listener = TcpListener::bind(addr).await?;
        Ok(BoundServer {
            listener,
            config: self.config,
            router: self.router,
        })
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        self.bind().await?.run().await
    }
}

/// A server with a bound socket, not yet accepting connections.
pub struct BoundServer {
    listener: TcpListener,
    config: ServerConfig,
    router: Arc<Router>,
}

impl BoundServer {
    /// The address actually bound, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections and serve requests.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Function server listening on {}", self.local_addr()?);

        let router = self.router;
        let max_body_size = self.config.max_body_size;

        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            let io = TokioIo::new(stream);

            let router = router.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let router = router.clone();
                    async move { handle_request(req, router, max_body_size, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    router: Arc<Router>,
    max_body_size: usize,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    debug!("Handling request: {} {} from {}", req.method(), req.uri(), remote_addr);

    let request = match convert_request(req, max_body_size).await {
        Ok(req) => req,
        Err(resp) => return Ok(build_response(resp)),
    };

    Ok(build_response(router.dispatch(request).await))
}

/// Convert a hyper Request to FunctionRequest, buffering the body.
async fn convert_request(
    req: Request<Incoming>,
    max_body_size: usize,
) -> Result<FunctionRequest, FunctionResponse> {
    let method = Method::from(req.method());
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in req.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let body_bytes = match Limited::new(req.into_body(), max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            warn!("Request body exceeds {} bytes", max_body_size);
            return Err(FunctionResponse::failure(
                StatusCode::PAYLOAD_TOO_LARGE,
                FunctionStatus::Crash,
                "Request body too large",
            ));
        }
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            return Err(FunctionResponse::failure(
                StatusCode::BAD_REQUEST,
                FunctionStatus::Crash,
                format!("Could not read request body: {err}"),
            ));
        }
    };

    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };

    Ok(FunctionRequest {
        method,
        url,
        headers,
        body,
    })
}

/// Build a hyper Response from FunctionResponse.
fn build_response(response: FunctionResponse) -> Response<Full<Bytes>> {
    let status = hyper::StatusCode::from_u16(response.status.0).unwrap_or_else(|_| {
        warn!(
            "Invalid status code {}, falling back to 500 Internal Server Error",
            response.status.0
        );
        hyper::StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut builder = Response::builder().status(status);

    for (name, value) in response.headers {
        builder = builder.header(name, value);
    }

    let body = response.body.unwrap_or_default();
    builder.body(Full::new(body)).unwrap_or_else(|err| {
        error!("Invalid response from function: {}", err);
        let mut fallback = Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}
