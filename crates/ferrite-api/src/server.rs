//! # HTTP Server
//!
//! One POST endpoint serving JSON-RPC, optional HTTP Basic
//! authentication, permissive CORS for tooling.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use base64::Engine as _;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::backend::NodeBackend;
use crate::error::ApiError;
use crate::rpc::{dispatch, RpcRequest, RpcResponse};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// HTTP Basic credentials; `None` disables authentication.
    pub basic_auth: Option<(String, String)>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8545,
            basic_auth: None,
        }
    }
}

#[derive(Clone)]
struct AppState {
    backend: Arc<dyn NodeBackend>,
    basic_auth: Option<(String, String)>,
}

/// Bind and serve. Returns the server task and the bound port.
pub async fn serve(
    config: ApiConfig,
    backend: Arc<dyn NodeBackend>,
) -> Result<(JoinHandle<()>, u16), std::io::Error> {
    let state = AppState {
        backend,
        basic_auth: config.basic_auth.clone(),
    };
    let router = Router::new()
        .route("/", post(handle))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let port = listener.local_addr()?.port();
    info!(host = %config.host, port, "API gateway listening");

    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            warn!(%error, "API server stopped");
        }
    });
    Ok((handle, port))
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some((user, pass)) = &state.basic_auth else {
        return true;
    };
    let expected = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .is_some_and(|got| got == expected)
}

async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"ferrite\"")],
            "unauthorized",
        )
            .into_response();
    }

    let parsed: Result<Value, _> = serde_json::from_slice(&body);
    let Ok(raw) = parsed else {
        return Json(RpcResponse::err(Value::Null, &ApiError::Parse)).into_response();
    };

    let request: Result<RpcRequest, _> = serde_json::from_value(raw);
    let Ok(request) = request else {
        return Json(RpcResponse::err(Value::Null, &ApiError::InvalidRequest)).into_response();
    };

    let id = request.id.clone();
    let response = match dispatch(&state.backend, &request) {
        Ok(result) => RpcResponse::ok(id, result),
        Err(error) => RpcResponse::err(id, &error),
    };
    Json(response).into_response()
}
