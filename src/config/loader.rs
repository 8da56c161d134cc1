//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Gateway port override.
pub const ENV_PROXY_PORT: &str = "PROXY_PORT";
/// Control channel port override.
pub const ENV_PROXY_WS_PORT: &str = "PROXY_WS_PORT";
/// Certificate store directory override.
pub const ENV_CERTSTORE: &str = "PROXY_ENCRYPT_CERTSTORE";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ProxyConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<ProxyConfig, ConfigError> {
    let mut config = ProxyConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PROXY_*` overrides on top of file values.
///
/// Port overrides keep the configured host and replace only the port.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup(ENV_PROXY_PORT) {
        config.gateway.bind_address = replace_port(&config.gateway.bind_address, &port);
    }
    if let Some(port) = lookup(ENV_PROXY_WS_PORT) {
        config.control.bind_address = replace_port(&config.control.bind_address, &port);
    }
    if let Some(dir) = lookup(ENV_CERTSTORE) {
        config.auth.certstore_dir = PathBuf::from(dir);
    }
}

fn replace_port(address: &str, port: &str) -> String {
    let host = address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address);
    format!("{}:{}", host, port.trim())
}
