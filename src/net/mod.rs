//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (gateway or control listener)
//!     → tls.rs (optional TLS handshake, rustls via axum-server)
//!     → connection.rs (connection id, in-flight tracking)
//!     → Hand off to HTTP / control layer
//! ```
//!
//! # Design Decisions
//! - Every control connection gets a process-unique ConnectionId at accept
//! - In-flight proxied requests are tracked for bounded graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
