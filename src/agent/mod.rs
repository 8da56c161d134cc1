//! Agent side of the control channel.
//!
//! # Data Flow
//! ```text
//! AgentConfig (url, agent id, RSA private key)
//!     → client.rs connect (Authorization + sub-protocol + Origin headers)
//!     → register / deregister / sysadmin events as signed JSON frames
//!     → next_close observes the proxy's verdict
//! ```

pub mod client;

pub use client::{AgentClient, AgentConfig, AgentError};
