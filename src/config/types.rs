//! Configuration types for tun-proxy
//!
//! This module defines the configuration structures used by the tunnel core.
//! Configuration is loaded from JSON files and validated before a tunnel is
//! created. Every section has field-level defaults so an empty object is a
//! valid configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest MTU accepted for the virtual interface
pub const MIN_MTU: usize = 576;

/// Largest MTU accepted for the virtual interface
pub const MAX_MTU: usize = 65_535;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Interface and reactor configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Default proxy parameters for a run
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Packet capture parameters
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        self.tunnel.validate()?;
        self.proxy.validate()?;
        self.capture.validate()?;
        Ok(())
    }

    /// Create the default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level or `EnvFilter` directive (e.g. "info", "`tun_proxy=debug`")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log.level must not be empty".into(),
            ));
        }

        if !matches!(self.format.as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "log.format must be 'text' or 'json', got '{}'",
                self.format
            )));
        }

        Ok(())
    }

    /// Whether JSON output was requested
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

/// Virtual interface configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Interface MTU, used to size scratch buffers
    #[serde(default = "default_mtu")]
    pub mtu: usize,

    /// Reactor loop tuning
    #[serde(default)]
    pub reactor: ReactorConfig,
}

impl TunnelConfig {
    /// Validate interface configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(ConfigError::ValidationError(format!(
                "tunnel.mtu must be within {MIN_MTU}..={MAX_MTU}, got {}",
                self.mtu
            )));
        }
        self.reactor.validate()
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            reactor: ReactorConfig::default(),
        }
    }
}

/// Reactor loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReactorConfig {
    /// Upper bound on a single readiness wait, in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Minimum interval between eviction sweeps, in milliseconds
    #[serde(default = "default_min_sweep_interval_ms")]
    pub min_sweep_interval_ms: u64,

    /// Maximum ready events retrieved per wait
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Share of the soft descriptor limit usable by sessions, in percent
    #[serde(default = "default_session_limit_percent")]
    pub session_limit_percent: u8,

    /// Absolute cap on the session capacity
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl ReactorConfig {
    /// Validate reactor configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reactor.default_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.min_sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reactor.min_sweep_interval_ms must be greater than 0".into(),
            ));
        }

        if self.min_sweep_interval() > self.default_timeout() {
            return Err(ConfigError::ValidationError(
                "reactor.min_sweep_interval_ms must not exceed the default timeout".into(),
            ));
        }

        if self.max_events == 0 {
            return Err(ConfigError::ValidationError(
                "reactor.max_events must be greater than 0".into(),
            ));
        }

        if self.session_limit_percent == 0 || self.session_limit_percent > 100 {
            return Err(ConfigError::ValidationError(format!(
                "reactor.session_limit_percent must be within 1..=100, got {}",
                self.session_limit_percent
            )));
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "reactor.max_sessions must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get the default wait timeout as Duration
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Get the minimum sweep interval as Duration
    #[must_use]
    pub const fn min_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.min_sweep_interval_ms)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_wait_timeout_secs(),
            min_sweep_interval_ms: default_min_sweep_interval_ms(),
            max_events: default_max_events(),
            session_limit_percent: default_session_limit_percent(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Per-run proxy parameters handed to the protocol handlers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Forward DNS queries upstream instead of answering locally
    #[serde(default)]
    pub forward_dns: bool,

    /// Response code used when a DNS query is answered locally
    #[serde(default = "default_dns_rcode")]
    pub dns_rcode: u8,

    /// Optional SOCKS5 upstream
    #[serde(default)]
    pub socks5: Option<Socks5Config>,
}

impl ProxyConfig {
    /// Validate proxy parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // DNS RCODE is a 4-bit field
        if self.dns_rcode > 15 {
            return Err(ConfigError::ValidationError(format!(
                "proxy.dns_rcode must be within 0..=15, got {}",
                self.dns_rcode
            )));
        }

        if let Some(socks5) = &self.socks5 {
            socks5.validate()?;
        }

        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            forward_dns: false,
            dns_rcode: default_dns_rcode(),
            socks5: None,
        }
    }
}

/// SOCKS5 upstream endpoint and credentials
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Socks5Config {
    /// Upstream address
    pub address: IpAddr,

    /// Upstream port
    pub port: u16,

    /// Optional username
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,
}

impl Socks5Config {
    /// Create an unauthenticated endpoint
    #[must_use]
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            username: None,
            password: None,
        }
    }

    /// Socket address of the upstream
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Validate the endpoint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "proxy.socks5.port must be greater than 0".into(),
            ));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationError(
                "proxy.socks5.password requires a username".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Socks5Config {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1080)
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for Socks5Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Config")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Packet capture configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Truncate each captured record to this many bytes
    #[serde(default)]
    pub record_size: Option<usize>,
}

impl CaptureConfig {
    /// Validate capture configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "capture.record_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// Default value functions for serde

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_mtu() -> usize {
    10_000
}

const fn default_wait_timeout_secs() -> u64 {
    3600
}

const fn default_min_sweep_interval_ms() -> u64 {
    100
}

const fn default_max_events() -> usize {
    20
}

const fn default_session_limit_percent() -> u8 {
    90
}

const fn default_max_sessions() -> usize {
    1000
}

const fn default_dns_rcode() -> u8 {
    3
}
