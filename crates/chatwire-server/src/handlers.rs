//! HTTP surface for the chatwire server.
//!
//! `/ws` authenticates the caller and hands the upgraded socket to the
//! connection pump; `/health` reports liveness and the local online count.

use crate::auth::JwtValidator;
use crate::config::{BrokerBackend, BrokerConfig, Config};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chatwire_core::{
    AuthError, Broker, Hub, MemoryMessageStore, MemoryPubSub, MessageRouter, MessageStore,
    PubSub, Pump, TokenValidator,
};
use chatwire_protocol::UserId;
use chatwire_transport::{Connection, WebSocketConnection};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The local client registry.
    pub hub: Arc<Hub>,
    /// Drives upgraded connections.
    pub pump: Pump,
    /// Resolves bearer tokens to users.
    pub validator: Arc<dyn TokenValidator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Build state from configuration: fabric per `[broker]`, JWT validation
    /// per `[auth]` and an in-process message store.
    ///
    /// # Errors
    ///
    /// Returns an error if the fabric cannot be reached or subscribed to.
    pub async fn new(config: Config) -> Result<Self> {
        let fabric = build_fabric(&config.broker).await?;
        let validator = Arc::new(JwtValidator::new(&config.auth.jwt_secret));
        Self::with_parts(config, fabric, Arc::new(MemoryMessageStore::new()), validator).await
    }

    /// Build state from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub cannot subscribe to the fabric.
    pub async fn with_parts(
        config: Config,
        fabric: Arc<dyn PubSub>,
        store: Arc<dyn MessageStore>,
        validator: Arc<dyn TokenValidator>,
    ) -> Result<Self> {
        let broker = Broker::with_topic(fabric, config.broker.topic.clone());
        let hub = Arc::new(Hub::with_config(broker, config.hub_config()));
        hub.start()
            .await
            .context("Failed to subscribe to the pub/sub fabric")?;

        let router = Arc::new(MessageRouter::new(hub.clone(), store));
        let pump = Pump::with_config(hub.clone(), router, config.pump_config());

        Ok(Self {
            hub,
            pump,
            validator,
            config,
        })
    }
}

async fn build_fabric(config: &BrokerConfig) -> Result<Arc<dyn PubSub>> {
    match config.backend {
        BrokerBackend::Memory => {
            info!("Using in-memory pub/sub; messages will not cross processes");
            Ok(Arc::new(MemoryPubSub::new()))
        }
        #[cfg(feature = "redis")]
        BrokerBackend::Redis => {
            let fabric = chatwire_core::RedisPubSub::connect(&config.url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.url))?;
            Ok(Arc::new(fabric))
        }
        #[cfg(not(feature = "redis"))]
        BrokerBackend::Redis => anyhow::bail!(
            "broker.backend = \"redis\" requires building with the `redis` feature"
        ),
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve `state` on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config).await?);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        backend = state.hub.broker().backend(),
        topic = state.hub.broker().topic(),
        "chatwire listening on {}",
        addr
    );
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.websocket_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Chat service is running",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online_users": state.hub.stats().online_count,
    }))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first, then the `token` query parameter.
fn extract_token(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    from_header
        .map(str::to_string)
        .or_else(|| query.token.clone().filter(|token| !token.is_empty()))
}

fn authenticate(state: &AppState, token: Option<String>) -> Result<UserId, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    state.validator.validate_token(&token)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match authenticate(&state, extract_token(&headers, &query)) {
        Ok(user_id) => user_id,
        Err(AuthError::MissingToken) => {
            metrics::record_auth_failure("missing_token");
            debug!(remote = %remote, "Rejecting upgrade without token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized: missing token").into_response();
        }
        Err(e) => {
            metrics::record_auth_failure("invalid_token");
            warn!(remote = %remote, error = %e, "Rejecting upgrade with invalid token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized: invalid token").into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let max_size = state.config.limits.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| handle_socket(socket, remote, user_id, state))
}

/// Run the pump on an upgraded socket.
async fn handle_socket(socket: WebSocket, remote: SocketAddr, user_id: UserId, state: Arc<AppState>) {
    let mut guard = ConnectionMetricsGuard::new();
    let connection = WebSocketConnection::new(socket).with_remote_addr(remote);
    debug!(user = user_id, connection = %connection.id(), "WebSocket connected");

    let reason = state.pump.run(Box::new(connection), user_id).await;
    guard.set_reason(reason);
}
