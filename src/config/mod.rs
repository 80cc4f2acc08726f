//! Configuration module for tun-proxy
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use tun_proxy::config::{load_config, Config};
//!
//! let config = load_config("/etc/tun-proxy/config.json").unwrap();
//! println!("MTU: {}", config.tunnel.mtu);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    CaptureConfig, Config, LogConfig, ProxyConfig, ReactorConfig, Socks5Config, TunnelConfig,
    MAX_MTU, MIN_MTU,
};
