// SPDX-License-Identifier: Apache-2.0

//! Invocation ingress.
//!
//! Thin HTTP surface over the invocation bridge: routes
//! `POST /invoke/{function}` to the bridge and maps each error kind to a
//! distinct response status, so operators can tell "not deployed" from
//! "backend down" from "isolated by the breaker".

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use emberless_core::{EmberError, InvocationResponse, Invoker};

#[derive(Clone)]
struct AppState {
    invoker: Arc<Invoker>,
    invoke_timeout: Duration,
}

pub async fn serve(
    addr: &str,
    invoker: Arc<Invoker>,
    invoke_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState {
        invoker,
        invoke_timeout,
    };

    let app = Router::new()
        .route("/invoke/{function}", post(invoke_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Ingress listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn invoke_handler(
    State(state): State<AppState>,
    Path(function): Path<String>,
    body: Bytes,
) -> Response {
    match state
        .invoker
        .invoke(&function, body.to_vec(), state.invoke_timeout)
        .await
    {
        Ok(response) => passthrough_response(response),
        Err(e) => error_response(e),
    }
}

/// Forward the backend response untouched, apart from hop-by-hop headers.
fn passthrough_response(response: InvocationResponse) -> Response {
    let mut builder = Response::builder().status(response.status);

    for (key, value) in &response.headers {
        if matches!(
            key.as_str(),
            "transfer-encoding" | "connection" | "content-length"
        ) {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_str());
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: EmberError) -> Response {
    let status = status_for(&err);
    tracing::debug!(status = status.as_u16(), error = %err, "Invocation failed");
    (status, Json(serde_json::json!({ "message": err.to_string() }))).into_response()
}

fn status_for(err: &EmberError) -> StatusCode {
    match err {
        EmberError::FunctionNotFound(_) => StatusCode::NOT_FOUND,
        EmberError::ContainerStart { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EmberError::Invocation { .. } => StatusCode::BAD_GATEWAY,
        // Fast-fail carries no retry pressure; 429 tells the caller to back
        // off rather than blaming the gateway.
        EmberError::CircuitOpen { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
