//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Agent "open" event (rule string)
//!     → matcher.rs (compile anchored prefix pattern)
//!     → stored on the Target in the registry
//!
//! Incoming request path
//!     → load_balancer selector asks each live Target's RouteRule
//!     → longest matching rule wins
//! ```
//!
//! # Design Decisions
//! - Rules compiled at registration, immutable afterwards
//! - Deterministic: same path and registry state always match the same rule
//! - Specificity is rule length (most specific route wins)

pub mod matcher;

pub use matcher::RouteRule;
