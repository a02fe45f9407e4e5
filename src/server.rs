//! HTTP front that routes every incoming request through the gateway.

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::config::ServerConfig;
use crate::gateway::{ControlMessage, Gateway};
use crate::network::{GatewayRequest, GatewayResponse, Network};

/// Path of the control channel endpoint.
pub const CONTROL_PATH: &str = "/__gateway/message";

struct ServerState<S: CacheStorage, N: Network> {
  gateway: Arc<Gateway<S, N>>,
}

impl<S: CacheStorage, N: Network> Clone for ServerState<S, N> {
  fn clone(&self) -> Self {
    Self {
      gateway: Arc::clone(&self.gateway),
    }
  }
}

/// Request bodies over `max_body_bytes` are rejected with 413; a body that
/// cannot be read for any other reason gets 400.
pub fn router<S: CacheStorage, N: Network>(
  gateway: Arc<Gateway<S, N>>,
  max_body_bytes: usize,
) -> Router {
  Router::new()
    .route(CONTROL_PATH, post(control::<S, N>))
    .fallback(intercept::<S, N>)
    .layer(DefaultBodyLimit::max(max_body_bytes))
    .with_state(ServerState { gateway })
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve<S: CacheStorage, N: Network>(
  gateway: Arc<Gateway<S, N>>,
  config: &ServerConfig,
) -> Result<()> {
  let listener = TcpListener::bind(config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;

  info!(addr = %config.listen, store = %gateway.store_name(), "listening");
  run(listener, gateway, config.max_body_bytes, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves, then wait
/// for outstanding store writes.
pub async fn run<S, N, F>(
  listener: TcpListener,
  gateway: Arc<Gateway<S, N>>,
  max_body_bytes: usize,
  shutdown: F,
) -> Result<()>
where
  S: CacheStorage,
  N: Network,
  F: Future<Output = ()> + Send + 'static,
{
  axum::serve(listener, router(Arc::clone(&gateway), max_body_bytes))
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  gateway.flush_writes().await;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!("failed to listen for Ctrl-C: {}", e);
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

async fn intercept<S: CacheStorage, N: Network>(
  State(state): State<ServerState<S, N>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Response {
  let target = uri
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_else(|| "/".to_string());

  let request = GatewayRequest {
    method,
    target,
    headers,
    body: body.to_vec(),
  };
  let method = request.method.clone();
  let target = request.target.clone();

  match state.gateway.on_fetch(request).await {
    Ok(response) => into_http(response),
    Err(e) => {
      warn!(%method, path = %target, "failed to fetch: {:#}", e);
      (StatusCode::BAD_GATEWAY, "failed to fetch").into_response()
    }
  }
}

fn into_http(response: GatewayResponse) -> Response {
  let mut http = Response::new(Body::from(response.body));
  *http.status_mut() = response.status;
  *http.headers_mut() = response.headers;
  http
}

async fn control<S: CacheStorage, N: Network>(
  State(state): State<ServerState<S, N>>,
  body: Bytes,
) -> Response {
  let message: ControlMessage = match serde_json::from_slice(&body) {
    Ok(message) => message,
    Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid message: {}", e)).into_response(),
  };

  match state.gateway.on_message(message).await {
    Ok(Some(reply)) => Json(reply).into_response(),
    Ok(None) => StatusCode::NO_CONTENT.into_response(),
    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
  }
}
