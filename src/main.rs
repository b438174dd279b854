//! fnframe - example function server
//!
//! Registers one function of each kind and serves them. Set
//! `FUNCTION_TARGET` to serve a single function at `/`.

use fnframe::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Debug, Serialize)]
struct Reply {
    message: String,
}

fn register() {
    fnframe::functions::http("hello", |request: FunctionRequest, ctx: Context| async move {
        let name = request
            .get_header("X-Name")
            .cloned()
            .unwrap_or_else(|| "World".to_string());

        let body = serde_json::json!({
            "message": format!("Hello, {}!", name),
            "method": request.method.to_string(),
            "path": request.url,
            "execution_id": ctx.execution_id,
        });
        Ok::<_, FunctionError>(FunctionResponse::json(&body)?)
    });

    fnframe::functions::cloud_event("audit", |ctx: Context, event: CloudEvent| async move {
        tracing::info!(
            "Received {} from {} [{}]",
            event.ty,
            event.source,
            ctx.execution_id
        );
        Ok::<_, BoxError>(())
    });

    fnframe::functions::event(
        "ingest",
        |ctx: Context, Json(data): Json<serde_json::Value>| async move {
            let event_type = ctx
                .metadata()
                .map(|m| m.event_type.clone())
                .unwrap_or_default();
            tracing::info!("Ingested event {:?}: {}", event_type, data);
            Ok::<_, String>(())
        },
    );

    fnframe::functions::typed("greet", |Json(greeting): Json<Greeting>| async move {
        if greeting.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(Reply {
            message: format!("Hello, {}!", greeting.name),
        })
    });
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = ServerConfig::from_env();
    init_tracing(config.log_format);

    register();

    tracing::info!("Try: curl http://localhost:{}/hello", config.port);
    tracing::info!(
        "Try: curl -d '{{\"name\":\"Ada\"}}' http://localhost:{}/greet",
        config.port
    );

    FunctionServer::from_default_registry(config)?.run().await
}
