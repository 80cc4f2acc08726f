//! Tunnel lifecycle integration tests
//!
//! # Test Categories
//!
//! 1. **Sequencing Tests**: start, stop and teardown in every order
//! 2. **Concurrency Tests**: overlapping stop calls from several threads
//! 3. **Configuration Tests**: runs started from loaded configuration

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tun_proxy::config::{load_config_str, Config, ProxyConfig, Socks5Config};
use tun_proxy::error::TunnelError;
use tun_proxy::handler::NoopHostBridge;
use tun_proxy::logging::build_subscriber;
use tun_proxy::tunnel::{RunConfig, Tunnel};

use super::common::{interface_pair, relay_handlers, wait_for, EchoServer};

fn start(tunnel: &Tunnel) -> Result<(), TunnelError> {
    let (handlers, _counters) = relay_handlers("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
    let (tun, _device) = interface_pair();
    tunnel.start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
}

// ============================================================================
// Sequencing Tests
// ============================================================================

#[test]
fn test_stop_before_start_is_noop() {
    let tunnel = Tunnel::new(Config::default());
    assert!(tunnel.stop().unwrap().is_none());
    assert!(tunnel.stop().unwrap().is_none());
}

#[test]
fn test_start_twice_rejected_then_restart() {
    let tunnel = Tunnel::new(Config::default());
    start(&tunnel).unwrap();
    assert!(matches!(start(&tunnel), Err(TunnelError::AlreadyRunning)));

    assert!(tunnel.stop().unwrap().is_some());
    assert!(!tunnel.is_running());

    start(&tunnel).unwrap();
    assert!(tunnel.is_running());
    assert!(tunnel.stop().unwrap().is_some());
}

#[test]
fn test_teardown_without_start() {
    let tunnel = Tunnel::new(Config::default());
    assert!(tunnel.teardown().unwrap().is_none());
    assert!(matches!(start(&tunnel), Err(TunnelError::TornDown)));
    assert!(tunnel.stop().unwrap().is_none());
}

#[test]
fn test_drop_stops_running_tunnel() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(60));
    let (tun, device) = interface_pair();

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();
    device.send(b"\x03x").unwrap();
    let mut buf = [0u8; 16];
    device.recv(&mut buf).unwrap();

    drop(tunnel);
    assert_eq!(counters.released.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_stops_join_once() {
    let tunnel = Arc::new(Tunnel::new(Config::default()));
    start(&tunnel).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tunnel = Arc::clone(&tunnel);
            thread::spawn(move || tunnel.stop().unwrap().is_some())
        })
        .collect();
    let joined = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|stopped| *stopped)
        .count();

    assert_eq!(joined, 1);
    assert!(!tunnel.is_running());
}

#[test]
fn test_stop_while_starting_elsewhere() {
    let tunnel = Arc::new(Tunnel::new(Config::default()));

    let starter = {
        let tunnel = Arc::clone(&tunnel);
        thread::spawn(move || start(&tunnel))
    };
    starter.join().unwrap().unwrap();

    let stopper = {
        let tunnel = Arc::clone(&tunnel);
        thread::spawn(move || tunnel.stop())
    };
    assert!(stopper.join().unwrap().unwrap().is_some());
    assert!(wait_for(|| !tunnel.is_running()));
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_run_from_loaded_config() {
    let config = load_config_str(
        r#"{
            "log": { "level": "debug" },
            "tunnel": { "mtu": 1500, "reactor": { "max_sessions": 16 } }
        }"#,
    )
    .unwrap();
    let (_subscriber, handle) = build_subscriber(&config.log).unwrap();

    let tunnel = Tunnel::new(config).with_log_handle(handle);
    assert_eq!(tunnel.current_mtu(), 1500);
    assert_eq!(tunnel.rewriter().max_len(), 3000);

    let proxy = ProxyConfig {
        socks5: Some(Socks5Config::default()),
        ..ProxyConfig::default()
    };
    let (handlers, _counters) = relay_handlers("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
    let (tun, _device) = interface_pair();
    tunnel
        .start(
            RunConfig::new(tun).with_proxy(proxy).with_log_level("trace"),
            handlers,
            Arc::new(NoopHostBridge),
        )
        .unwrap();

    assert!(tunnel.stop().unwrap().is_some());
    tunnel.teardown().unwrap();
}

#[test]
fn test_invalid_run_log_level_does_not_fail_start() {
    let config = Config::default();
    let (_subscriber, handle) = build_subscriber(&config.log).unwrap();
    let tunnel = Tunnel::new(config).with_log_handle(handle);

    let (handlers, _counters) = relay_handlers("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
    let (tun, _device) = interface_pair();
    tunnel
        .start(
            RunConfig::new(tun).with_log_level("[[not a filter"),
            handlers,
            Arc::new(NoopHostBridge),
        )
        .unwrap();
    assert!(tunnel.stop().unwrap().is_some());
}
