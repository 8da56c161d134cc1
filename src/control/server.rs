//! Control channel upgrade endpoint.
//!
//! Every path on the control listener accepts the upgrade. The request must
//! carry an allowed Origin, a verifiable `INTELI-SHA256` Authorization header
//! and offer the configured sub-protocol first; anything else is answered
//! with 401 and never upgraded.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ControlConfig;
use crate::control::auth::{AllowAnyOrigin, AuthError, Authenticator, Credentials, OriginAllowList, OriginPolicy};
use crate::control::handler::EventDispatcher;
use crate::control::session::{run_session, SessionInfo, SessionState};
use crate::control::HandshakeError;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionTracker};
use crate::observability::metrics;

/// Shared state of the control listener.
#[derive(Clone)]
pub struct ControlState {
    pub(crate) config: Arc<ControlConfig>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) origins: Arc<dyn OriginPolicy>,
    pub(crate) sessions: Arc<DashMap<ConnectionId, SessionInfo>>,
    pub(crate) live_sessions: ConnectionTracker,
    pub(crate) shutdown: Shutdown,
}

impl ControlState {
    pub fn new(
        config: ControlConfig,
        dispatcher: Arc<EventDispatcher>,
        authenticator: Arc<dyn Authenticator>,
        shutdown: Shutdown,
    ) -> Self {
        let origins = origin_policy(&config.allowed_origins);
        Self {
            config: Arc::new(config),
            dispatcher,
            authenticator,
            origins,
            sessions: Arc::new(DashMap::new()),
            live_sessions: ConnectionTracker::new(),
            shutdown,
        }
    }

    /// Replace the origin policy derived from the config.
    pub fn with_origin_policy(mut self, origins: Arc<dyn OriginPolicy>) -> Self {
        self.origins = origins;
        self
    }

    /// Live control sessions.
    pub fn sessions(&self) -> &DashMap<ConnectionId, SessionInfo> {
        &self.sessions
    }

    /// Wait until every session task has cleaned up, or `timeout` elapses.
    /// Returns false if sessions were still running at the deadline.
    pub async fn drain_sessions(&self, timeout: Duration) -> bool {
        self.live_sessions.drain(timeout).await
    }
}

/// An empty list allows any origin.
pub fn origin_policy(allowed: &[String]) -> Arc<dyn OriginPolicy> {
    if allowed.is_empty() {
        Arc::new(AllowAnyOrigin)
    } else {
        Arc::new(OriginAllowList::new(allowed.to_vec()))
    }
}

/// Router for the control listener.
pub fn control_router(state: ControlState) -> Router {
    Router::new()
        .route("/", any(upgrade_handler))
        .route("/{*path}", any(upgrade_handler))
        .with_state(state)
}

async fn upgrade_handler(
    State(state): State<ControlState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(peer = %peer, state = %SessionState::Connecting, "Control upgrade requested");

    let agent_id = match authorize(&state, &headers).await {
        Ok(agent_id) => agent_id,
        Err(e) => {
            tracing::warn!(peer = %peer, state = %SessionState::Rejected, reason = %e, "Control connection rejected");
            metrics::record_control_connection("rejected");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let connection_id = ConnectionId::new();
    metrics::record_control_connection("accepted");

    ws.protocols([state.config.subprotocol.clone()])
        .on_failed_upgrade(move |e| {
            tracing::warn!(connection_id = %connection_id, error = %e, "Control upgrade failed");
        })
        .on_upgrade(move |socket| run_session(socket, connection_id, agent_id, peer, state))
}

/// Check origin, credential and sub-protocol. Returns the agent id.
async fn authorize(state: &ControlState, headers: &HeaderMap) -> Result<String, HandshakeError> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.origins.allows(origin) {
        return Err(HandshakeError::Origin(origin.map(str::to_owned)));
    }

    tracing::debug!(state = %SessionState::Authenticating, "Verifying agent credential");
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;
    let credentials = Credentials::from_authorization(value)?;
    state.authenticator.verify(&credentials).await?;

    let offered = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    if offered != Some(state.config.subprotocol.as_str()) {
        return Err(HandshakeError::Subprotocol(offered.map(str::to_owned)));
    }

    Ok(credentials.agent_id.unwrap_or_default())
}
