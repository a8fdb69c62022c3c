//! HTTP front end: JSON-RPC forwarding on `POST`, control endpoints on
//! `GET`, everything else 404.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{
    dispatcher, intercept,
    state::{AppState, ProxyError},
};

/// Upper bound on forwarded request bodies.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Builds the proxy router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(forward))
        .route("/reload", get(reload))
        .route("/.json", get(json_report))
        .route("/.lcov", get(lcov_report))
        .fallback(fallback)
        .with_state(state)
}

/// Binds the configured port, starts the dispatcher task and serves until
/// the process ends. Failing to bind is fatal.
pub async fn serve(state: Arc<AppState>) -> Result<(), ProxyError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })?;

    serve_on(state, listener).await
}

/// Serves on an already-bound listener; used when the caller picks the port.
pub async fn serve_on(
    state: Arc<AppState>,
    listener: tokio::net::TcpListener,
) -> Result<(), ProxyError> {
    tokio::spawn(dispatcher::run(Arc::clone(&state)));

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(upstream = %state.config.rpc_url, "proxy listening on {addr}");
    }

    axum::serve(listener, router(state))
        .await
        .map_err(ProxyError::Serve)
}

async fn forward(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    forward_body(&state, &body).await
}

/// JSON-RPC clients post to arbitrary paths; anything that is not a known
/// control endpoint is forwarded when it is a `POST` and 404 otherwise.
async fn fallback(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if request.method() != Method::POST {
        return StatusCode::NOT_FOUND.into_response();
    }

    match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => forward_body(&state, &body).await,
        Err(_) => StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    }
}

async fn forward_body(state: &AppState, body: &[u8]) -> Response {
    match intercept::handle_rpc(state, body).await {
        Ok(response) => (
            [(header::CONTENT_TYPE, "application/json")],
            response,
        )
            .into_response(),
        Err(error) => {
            tracing::error!("upstream request failed: {error}");
            (StatusCode::BAD_GATEWAY, format!("upstream request failed: {error}\n"))
                .into_response()
        }
    }
}

async fn reload(State(state): State<Arc<AppState>>) -> Response {
    match state.reload().await {
        Ok(()) => "reloaded\n".into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("reload failed: {error}\n"),
        )
            .into_response(),
    }
}

async fn json_report(State(state): State<Arc<AppState>>) -> Response {
    let report = state.report().await;
    (
        [(header::CONTENT_TYPE, "application/json")],
        report.json.to_string(),
    )
        .into_response()
}

async fn lcov_report(State(state): State<Arc<AppState>>) -> Response {
    let report = state.report().await;
    ([(header::CONTENT_TYPE, "text/plain")], report.lcov).into_response()
}
