//! Per-connection control session.
//!
//! # Lifecycle
//! 1. The upgrade handler authenticates the request and assigns a ConnectionId.
//! 2. `run_session` records the session and loops over:
//!    * inbound frames, dispatched in order
//!    * a keepalive ping every interval, with a deadline of interval + grace
//!    * the control plane shutdown broadcast
//! 3. Whatever ends the task, including a panic while handling a message,
//!    the registry entry and the session record are removed by the
//!    `SessionGuard` it owns.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::body::Bytes;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval_at, sleep_until, Instant as TokioInstant, MissedTickBehavior};

use crate::control::handler::Resolution;
use crate::control::protocol::CloseCode;
use crate::control::server::ControlState;
use crate::load_balancer::TargetRegistry;
use crate::net::{ConnectionGuard, ConnectionId};
use crate::observability::metrics;

/// Where a control connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    /// Upgraded, no target advertised yet.
    Accepted,
    Registered,
    Closed,
    Rejected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Accepted => "accepted",
            SessionState::Registered => "registered",
            SessionState::Closed => "closed",
            SessionState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Record kept for every live control connection.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub agent_id: String,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub state: SessionState,
}

/// Ties a connection's registry entry and session record to the session task.
struct SessionGuard {
    connection_id: ConnectionId,
    registry: Arc<TargetRegistry>,
    sessions: Arc<DashMap<ConnectionId, SessionInfo>>,
    released: bool,
    _live: ConnectionGuard,
}

impl SessionGuard {
    fn new(state: &ControlState, connection_id: ConnectionId, info: SessionInfo) -> Self {
        let live = state.live_sessions.track();
        state.sessions.insert(connection_id, info);
        Self {
            connection_id,
            registry: state.dispatcher.registry().clone(),
            sessions: state.sessions.clone(),
            released: false,
            _live: live,
        }
    }

    /// Deregister the target and drop the session record. Returns whether a
    /// target was registered.
    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        let removed = self.registry.remove_host(self.connection_id).is_some();
        if let Some((_, mut info)) = self.sessions.remove(&self.connection_id) {
            info.state = SessionState::Closed;
            tracing::debug!(
                connection_id = %self.connection_id,
                state = %info.state,
                duration = ?info.connected_at.elapsed(),
                "Session record dropped"
            );
        }
        removed
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.released {
            let deregistered = self.release();
            tracing::warn!(connection_id = %self.connection_id, deregistered, "Control session aborted");
        }
    }
}

#[derive(Debug)]
enum Exit {
    /// We close with this code.
    Close(CloseCode),
    PeerClosed(Option<u16>),
    TransportError(axum::Error),
    KeepaliveTimeout,
}

pub(crate) async fn run_session(
    mut socket: WebSocket,
    connection_id: ConnectionId,
    agent_id: String,
    peer: SocketAddr,
    state: ControlState,
) {
    let mut guard = SessionGuard::new(
        &state,
        connection_id,
        SessionInfo {
            agent_id: agent_id.clone(),
            peer,
            connected_at: Instant::now(),
            state: SessionState::Accepted,
        },
    );
    tracing::info!(connection_id = %connection_id, agent_id = %agent_id, peer = %peer, "Control connection accepted");

    let keepalive: Duration = state.config.keepalive_interval();
    let deadline_after: Duration = state.config.keepalive_deadline();
    let mut ping = interval_at(TokioInstant::now() + keepalive, keepalive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline = TokioInstant::now() + deadline_after;

    let exit = loop {
        tokio::select! {
            frame = socket.recv() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => break Exit::TransportError(e),
                    None => break Exit::PeerClosed(None),
                };
                deadline = TokioInstant::now() + deadline_after;

                match message {
                    Message::Text(text) => {
                        let dispatched = AssertUnwindSafe(state.dispatcher.dispatch(connection_id, text.as_str()))
                            .catch_unwind()
                            .await;
                        let resolution = match dispatched {
                            Ok(Ok(resolution)) => resolution,
                            Ok(Err(e)) => {
                                tracing::warn!(connection_id = %connection_id, agent_id = %agent_id, error = %e, "Control message rejected");
                                metrics::record_control_event("unknown", "error");
                                break Exit::Close(CloseCode::InvalidData);
                            }
                            Err(_) => {
                                tracing::error!(connection_id = %connection_id, agent_id = %agent_id, "Control event handler panicked");
                                metrics::record_control_event("unknown", "panic");
                                break Exit::Close(CloseCode::InvalidData);
                            }
                        };
                        if resolution == Resolution::Valid {
                            mark_registration(&state, connection_id);
                        }
                        if let Some(code) = resolution.close_code() {
                            break Exit::Close(code);
                        }
                    }
                    Message::Binary(_) => {
                        tracing::warn!(connection_id = %connection_id, agent_id = %agent_id, "Binary control frame rejected");
                        break Exit::Close(CloseCode::InvalidData);
                    }
                    Message::Close(frame) => break Exit::PeerClosed(frame.map(|f| f.code)),
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = ping.tick() => {
                if let Err(e) = socket.send(Message::Ping(Bytes::new())).await {
                    break Exit::TransportError(e);
                }
            }
            _ = sleep_until(deadline) => break Exit::KeepaliveTimeout,
            _ = state.shutdown.wait() => break Exit::Close(CloseCode::GoingAway),
        }
    };

    if let Exit::Close(code) = &exit {
        let frame = CloseFrame {
            code: code.as_u16(),
            reason: Utf8Bytes::from_static(code.reason()),
        };
        if let Err(e) = socket.send(Message::Close(Some(frame))).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Failed to send close frame");
        }
    }

    let removed = guard.release();

    match exit {
        Exit::Close(code) => {
            tracing::info!(connection_id = %connection_id, agent_id = %agent_id, code = %code, deregistered = removed, "Control connection closed by proxy")
        }
        Exit::PeerClosed(code) => {
            tracing::info!(connection_id = %connection_id, agent_id = %agent_id, code = ?code, deregistered = removed, "Control connection closed by agent")
        }
        Exit::TransportError(e) => {
            tracing::warn!(connection_id = %connection_id, agent_id = %agent_id, error = %e, deregistered = removed, "Control connection failed")
        }
        Exit::KeepaliveTimeout => {
            tracing::warn!(connection_id = %connection_id, agent_id = %agent_id, deregistered = removed, "Control connection timed out")
        }
    }
}

fn mark_registration(state: &ControlState, connection_id: ConnectionId) {
    if !state.dispatcher.registry().contains(connection_id) {
        return;
    }
    if let Some(mut info) = state.sessions.get_mut(&connection_id) {
        info.state = SessionState::Registered;
    }
}
