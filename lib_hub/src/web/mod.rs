//! # HTTP Surface
//!
//! One axum router serves everything on the hub port: WebSocket upgrades on
//! any path, the `/api` forwarder, static content and a health probe.

/// Upstream forwarding for `/api/*`.
pub mod forwarder;

use std::path::Path;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{extract::ws::WebSocketUpgrade, Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::connections::BrokerHealth;
use crate::core::gateway;
use crate::core::registry::ConnectionRegistry;
use crate::core::relay::RelayStats;
pub use forwarder::ApiForwarder;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HubState {
    pub registry: ConnectionRegistry,
    pub stats: Arc<RelayStats>,
    pub health: watch::Receiver<BrokerHealth>,
    pub forwarder: ApiForwarder,
    /// Cancelled on server shutdown; every session closes with it.
    pub shutdown: CancellationToken,
}

/// Builds the hub router. `root_path` holds `index.html` and `images/`.
pub fn build_router(state: HubState, root_path: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([
            Method::GET,
            Method::PATCH,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/{*rest}", any(api_handler))
        .nest_service("/images", ServeDir::new(root_path.join("images")))
        .route_service("/", ServeFile::new(root_path.join("index.html")))
        // Set before the upgrade layer so unrouted paths still reach it.
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), intercept_upgrades))
        .layer(cors)
        .with_state(state)
}

/// True for an HTTP/1.1 `Upgrade: websocket` request.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Upgrade requests are accepted on every path before routing; the path
/// itself names the connection.
async fn intercept_upgrades(State(state): State<HubState>, request: Request, next: Next) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => gateway::accept(
            ws,
            parts.uri.path(),
            state.registry.clone(),
            state.shutdown.clone(),
        ),
        Err(rejection) => {
            tracing::warn!(path = %parts.uri.path(), error = %rejection, "Rejected upgrade request");
            rejection.into_response()
        }
    }
}

async fn api_handler(State(state): State<HubState>, request: Request) -> Response {
    state.forwarder.forward(request).await
}

/// Body of `GET /health`. `status` is `degraded` whenever the broker is not
/// connected, since nothing can be relayed then.
pub fn health_report(state: &HubState) -> serde_json::Value {
    let broker = state.health.borrow().clone();
    let status = if broker.is_connected() { "ok" } else { "degraded" };
    json!({
        "status": status,
        "broker": broker,
        "connections": state.registry.len(),
        "relay": state.stats.snapshot(),
    })
}

async fn health_handler(State(state): State<HubState>) -> impl IntoResponse {
    Json(health_report(&state))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn detects_websocket_upgrade_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    fn state_with(health: BrokerHealth) -> HubState {
        let (_tx, health) = watch::channel(health);
        HubState {
            registry: ConnectionRegistry::new(),
            stats: Arc::new(RelayStats::new()),
            health,
            forwarder: ApiForwarder::new("localhost:8084").unwrap(),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn health_status_follows_broker_state() {
        let report = health_report(&state_with(BrokerHealth::Connected));
        assert_eq!(report["status"], "ok");
        assert_eq!(report["connections"], 0);

        let report = health_report(&state_with(BrokerHealth::Unavailable {
            last_error: "refused".to_string(),
        }));
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["broker"]["state"], "unavailable");
        assert_eq!(report["broker"]["last_error"], "refused");

        let report = health_report(&state_with(BrokerHealth::Reconnecting {
            attempt: 2,
            retry_in_ms: 2000,
            last_error: "reset".to_string(),
        }));
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["broker"]["attempt"], 2);
    }
}
