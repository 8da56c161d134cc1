//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Control session "open"  → registry.rs add_host (keyed by connection)
//! Control session closed  → registry.rs remove_host
//! Gateway request path    → registry.rs get_target_host
//!     → purge stale queue entries
//!     → LoadBalancer::next_target (round_robin.rs by default)
//!         - longest matching rule
//!         - lowest use counter among same-rule peers
//!     → Target snapshot (target.rs) or None
//! ```
//!
//! # Design Decisions
//! - Selection mutates per-target counters under the registry lock
//! - The strategy is a trait object so alternate policies can be plugged in
//! - Targets are only ever returned by value

pub mod registry;
pub mod round_robin;
pub mod target;

pub use registry::TargetRegistry;
pub use round_robin::WeightedRoundRobin;
pub use target::{Target, TargetAddress, USE_COUNTER_MODULUS};

/// Strategy choosing which live target serves a path.
///
/// `candidates` are the live targets in registration order. Implementations
/// may update their selection state and return the index of the chosen one.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_target(&self, path: &str, candidates: &mut [&mut Target]) -> Option<usize>;
}
