//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Forwarding gateway listener.
    pub gateway: ListenerConfig,

    /// Control channel listener and session tuning.
    pub control: ControlConfig,

    /// Optional TLS configuration, shared by both listeners.
    pub tls: Option<TlsConfig>,

    /// Agent authentication settings.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Target selection settings.
    pub balancer: BalancerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration for the forwarding gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Control channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Bind address of the WebSocket control endpoint.
    pub bind_address: String,

    /// Application sub-protocol agents must request.
    pub subprotocol: String,

    /// Interval between keepalive pings, in seconds.
    pub keepalive_interval_secs: u64,

    /// Extra time a silent agent is given after a missed ping, in seconds.
    pub keepalive_grace_secs: u64,

    /// Origins allowed to open a control connection. Empty allows any.
    pub allowed_origins: Vec<String>,

    /// Agent id allowed to issue sysadmin events.
    pub sysadmin_agent_id: String,
}

impl ControlConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Silence longer than this drops the connection.
    pub fn keepalive_deadline(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs + self.keepalive_grace_secs)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            subprotocol: "inteli".to_string(),
            keepalive_interval_secs: 20,
            keepalive_grace_secs: 10,
            allowed_origins: Vec::new(),
            sysadmin_agent_id: "sysadmin".to_string(),
        }
    }
}

/// TLS configuration for the listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Agent authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding `<agentId>_publicKey.pem` files.
    pub certstore_dir: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            certstore_dir: PathBuf::from("certstore"),
        }
    }
}

/// Timeout configuration for forwarded requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period for in-flight requests before listeners are force-closed.
    pub close_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 500,
        }
    }
}

/// Target selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Deprioritise targets whose use counter just wrapped.
    pub pending_on_wrap: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            pending_on_wrap: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.bind_address, "0.0.0.0:3000");
        assert_eq!(config.control.subprotocol, "inteli");
        assert!(config.tls.is_none());
        assert!(config.balancer.pending_on_wrap);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [control]
            bind_address = "127.0.0.1:4001"
            keepalive_interval_secs = 5

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.control.bind_address, "127.0.0.1:4001");
        assert_eq!(config.control.keepalive_grace_secs, 10);
        assert_eq!(config.control.keepalive_deadline(), Duration::from_secs(15));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
