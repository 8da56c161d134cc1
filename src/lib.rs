//! Dynamic reverse proxy whose backends register over an authenticated
//! WebSocket control channel.

pub mod agent;
pub mod config;
pub mod control;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use lifecycle::{ProxyServer, ServerState, Shutdown};
pub use load_balancer::{Target, TargetRegistry};
