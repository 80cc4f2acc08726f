//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::{Config, Socks5Config};
use crate::error::ConfigError;

/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "TUN_PROXY_LOG_LEVEL";
/// Environment variable overriding `tunnel.mtu`
pub const ENV_MTU: &str = "TUN_PROXY_MTU";
/// Environment variable overriding the SOCKS5 upstream address
pub const ENV_SOCKS5_ADDR: &str = "TUN_PROXY_SOCKS5_ADDR";
/// Environment variable overriding the SOCKS5 upstream port
pub const ENV_SOCKS5_PORT: &str = "TUN_PROXY_SOCKS5_PORT";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        mtu = config.tunnel.mtu,
        socks5 = config.proxy.socks5.is_some(),
        "Configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `TUN_PROXY_LOG_LEVEL`: Override log level
/// - `TUN_PROXY_MTU`: Override interface MTU
/// - `TUN_PROXY_SOCKS5_ADDR`: Override SOCKS5 upstream address
/// - `TUN_PROXY_SOCKS5_PORT`: Override SOCKS5 upstream port
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides looked up through `lookup`, then re-validate
pub(crate) fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(mtu) = lookup(ENV_MTU) {
        config.tunnel.mtu = mtu.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_MTU.into(),
            reason: format!("Invalid number: {mtu}"),
        })?;
        debug!("MTU overridden to {}", config.tunnel.mtu);
    }

    if let Some(addr) = lookup(ENV_SOCKS5_ADDR) {
        let address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_SOCKS5_ADDR.into(),
            reason: format!("Invalid IP address: {addr}"),
        })?;
        config
            .proxy
            .socks5
            .get_or_insert_with(Socks5Config::default)
            .address = address;
        debug!("SOCKS5 address overridden to {}", address);
    }

    if let Some(port) = lookup(ENV_SOCKS5_PORT) {
        let port = port.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_SOCKS5_PORT.into(),
            reason: format!("Invalid port: {port}"),
        })?;
        config
            .proxy
            .socks5
            .get_or_insert_with(Socks5Config::default)
            .port = port;
        debug!("SOCKS5 port overridden to {}", port);
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_config() {
        let file = create_temp_config();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tunnel.mtu, 10_000);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_str() {
        let json = r#"{
            "tunnel": { "mtu": 1500, "reactor": { "max_events": 64 } },
            "proxy": { "forward_dns": true, "socks5": { "address": "10.1.1.1", "port": 1080 } }
        }"#;
        let config = load_config_str(json).unwrap();
        assert_eq!(config.tunnel.mtu, 1500);
        assert_eq!(config.tunnel.reactor.max_events, 64);
        assert_eq!(config.tunnel.reactor.min_sweep_interval_ms, 100);
        assert!(config.proxy.forward_dns);
        assert_eq!(config.proxy.socks5.unwrap().port, 1080);
    }

    #[test]
    fn test_load_config_invalid_json() {
        let result = load_config_str("not valid json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let result = load_config_str(r#"{ "tunnel": { "mtu": 10 } }"#);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default_config();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_LOG_LEVEL, "debug"),
                (ENV_MTU, "1500"),
                (ENV_SOCKS5_ADDR, "192.168.1.10"),
                (ENV_SOCKS5_PORT, "9050"),
            ]),
        )
        .unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.tunnel.mtu, 1500);
        let socks5 = config.proxy.socks5.unwrap();
        assert_eq!(socks5.endpoint(), "192.168.1.10:9050".parse().unwrap());
    }

    #[test]
    fn test_env_override_invalid_value() {
        let mut config = Config::default_config();
        let result = apply_env_overrides(&mut config, env(&[(ENV_MTU, "huge")]));
        assert!(matches!(result, Err(ConfigError::EnvError { name, .. }) if name == ENV_MTU));

        let result = apply_env_overrides(&mut config, env(&[(ENV_SOCKS5_PORT, "70000")]));
        assert!(matches!(result, Err(ConfigError::EnvError { .. })));
    }

    #[test]
    fn test_create_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        create_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.proxy.dns_rcode, 3);
    }
}
