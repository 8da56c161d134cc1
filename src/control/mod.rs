//! Control plane subsystem.
//!
//! # Data Flow
//! ```text
//! Agent WebSocket upgrade
//!     → server.rs (origin, INTELI-SHA256 credential, sub-protocol; else 401)
//!     → session.rs (one task per connection, keepalive, shutdown)
//!         → handler.rs (decode envelope, re-verify, dispatch)
//!             - webServer/open   → TargetRegistry::add_host
//!             - webServer/close  → close 1000
//!             - sysadmin/*       → auth.rs CertStore
//!             - other types      → CustomEventHandler
//!     → on any exit: TargetRegistry::remove_host
//! ```
//!
//! # Design Decisions
//! - The session task is the only place that deregisters a connection
//! - Failures are isolated per connection; the listener never stops for one agent

pub mod auth;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;

use thiserror::Error;

pub use auth::{Authenticator, CertStore, CertStoreAuthenticator, Credentials, OriginPolicy};
pub use handler::{CustomEventHandler, EventContext, EventDispatcher, Resolution};
pub use protocol::{CloseCode, ControlEvent, HostPayload, HostTarget};
pub use server::{control_router, ControlState};
pub use session::{SessionInfo, SessionState};

/// Failure while handling a control message. Closes the connection with 1007.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid event payload: {0}")]
    Payload(serde_json::Error),

    #[error("sysadmin add requires a public key")]
    MissingPublicKey,

    #[error(transparent)]
    Auth(#[from] auth::AuthError),
}

/// Reason an upgrade request was refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("origin {0:?} is not allowed")]
    Origin(Option<String>),

    #[error(transparent)]
    Auth(#[from] auth::AuthError),

    #[error("sub-protocol {0:?} is not supported")]
    Subprotocol(Option<String>),
}
