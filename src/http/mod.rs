//! HTTP protocol handling subsystem (the public gateway).
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, trace span)
//!     → TargetRegistry::get_target_host(path)
//!         - None   → response.rs 503
//!     → request.rs (URI rewrite, hop-by-hop strip; Host kept)
//!     → pooled hyper-util client
//!     → response.rs (hop-by-hop strip, or 503 on failure)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{gateway_router, GatewayState};
