//! Backend descriptor.
//!
//! # Responsibilities
//! - Represent one registered backend (agent id, rule, address, version)
//! - Carry the selection state the load balancer mutates (use counter, pending)

use std::fmt;
use url::Url;

use crate::routing::RouteRule;

/// Width of the cycling use counter.
pub const USE_COUNTER_MODULUS: u32 = 100;

/// Network address of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetAddress {
    pub host: String,
    pub port: u16,
}

impl TargetAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base URL requests are forwarded to.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}", self.authority()))
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// A registered backend server.
#[derive(Debug, Clone)]
pub struct Target {
    /// Agent id of the backend.
    pub id: String,
    /// Compiled routing rule.
    pub rule: RouteRule,
    /// Where traffic is forwarded.
    pub address: TargetAddress,
    /// Informational protocol version reported by the agent.
    pub protocol_version: String,
    /// Cycles through `0..USE_COUNTER_MODULUS`, lowest is picked first.
    pub use_counter: u32,
    /// Set when `use_counter` wrapped; deprioritises this target until its peers wrap too.
    pub pending: bool,
}

impl Target {
    pub fn new(
        id: impl Into<String>,
        rule: RouteRule,
        address: TargetAddress,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rule,
            address,
            protocol_version: protocol_version.into(),
            use_counter: 0,
            pending: false,
        }
    }

    /// Reset selection state, as done on registration.
    pub fn reset_usage(&mut self) {
        self.use_counter = 0;
        self.pending = false;
    }

    /// Count one selection. Returns true if the counter wrapped.
    pub fn record_use(&mut self) -> bool {
        self.use_counter = (self.use_counter + 1) % USE_COUNTER_MODULUS;
        self.use_counter == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_modulus() {
        let mut target = Target::new("WEB001", RouteRule::root(), TargetAddress::new("localhost", 4242), "1.0.0");
        for _ in 0..USE_COUNTER_MODULUS - 1 {
            assert!(!target.record_use());
        }
        assert_eq!(target.use_counter, USE_COUNTER_MODULUS - 1);
        assert!(target.record_use());
        assert_eq!(target.use_counter, 0);
    }

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(TargetAddress::new("::1", 8080).authority(), "[::1]:8080");
        assert_eq!(TargetAddress::new("localhost", 4242).to_string(), "localhost:4242");
        assert_eq!(
            TargetAddress::new("127.0.0.1", 80).base_url().unwrap().as_str(),
            "http://127.0.0.1/"
        );
    }
}
