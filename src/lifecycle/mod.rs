//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → clear registry → load TLS → bind gateway + control → Open
//!
//! Shutdown (shutdown.rs, startup.rs):
//!     stop() → broadcast to sessions (close 1001) → drain in-flight requests
//!         → close listeners → clear registry → Closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop()
//! ```
//!
//! # Design Decisions
//! - Start and stop are refused (Ok(false)) outside Closed and Open
//! - Shutdown has a deadline: connections left after close_timeout are dropped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{ProxyServer, ServerError, ServerState};
