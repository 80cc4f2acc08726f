//! Reactor integration tests
//!
//! # Test Categories
//!
//! 1. **Relay Tests**: packets cross the interface, the session socket and back
//! 2. **Eviction Tests**: idle sessions leave the registry on their own
//! 3. **Cancellation Tests**: a stop request wins over pending traffic

use std::sync::Arc;
use std::time::Duration;

use tun_proxy::config::{Config, ProxyConfig, ReactorConfig};
use tun_proxy::context::RunContext;
use tun_proxy::handler::NoopHostBridge;
use tun_proxy::reactor::{EventLoop, Waker};
use tun_proxy::session::SessionRegistry;
use tun_proxy::tunnel::{RunConfig, Tunnel};

use super::common::{count, interface_pair, relay_handlers, wait_for, EchoServer};

// ============================================================================
// Test Helpers
// ============================================================================

fn recv_packet(device: &std::os::unix::net::UnixDatagram) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let n = device.recv(&mut buf).expect("reply from tunnel");
    buf[..n].to_vec()
}

// ============================================================================
// Relay Tests
// ============================================================================

#[test]
fn test_udp_round_trip_through_tunnel() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(60));
    let (tun, device) = interface_pair();

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    device.send(b"\x01hello").unwrap();
    assert_eq!(recv_packet(&device), b"\x01hello");
    assert_eq!(tunnel.session_counts().udp, 1);

    let stats = tunnel.stop().unwrap().expect("run stats");
    assert!(stats.cancelled);
    assert_eq!(tunnel.session_counts().total(), 0);
    assert_eq!(count(&counters.released), 1);
    assert_eq!(count(&counters.replies), 1);
}

#[test]
fn test_flows_share_sessions_by_key() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(60));
    let (tun, device) = interface_pair();

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    for packet in [&b"\x01a"[..], b"\x02b", b"\x01c"] {
        device.send(packet).unwrap();
        assert_eq!(recv_packet(&device), packet);
    }

    let counts = tunnel.session_counts();
    assert_eq!(counts.udp, 2);
    assert_eq!(counts.icmp + counts.tcp, 0);
    assert_eq!(count(&counters.inbound), 3);

    tunnel.stop().unwrap();
    assert_eq!(count(&counters.released), 2);
}

#[test]
fn test_burst_is_fully_drained() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(60));
    let (tun, device) = interface_pair();

    // Queued before the reactor exists
    for flow in 0u8..8 {
        device.send(&[flow, b'x']).unwrap();
    }

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    let mut flows: Vec<u8> = (0..8).map(|_| recv_packet(&device)[0]).collect();
    flows.sort_unstable();
    assert_eq!(flows, (0u8..8).collect::<Vec<_>>());
    assert_eq!(count(&counters.inbound), 8);
    assert_eq!(tunnel.session_counts().udp, 8);

    tunnel.stop().unwrap();
}

// ============================================================================
// Eviction Tests
// ============================================================================

#[test]
fn test_idle_session_is_evicted() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_millis(100));
    let (tun, device) = interface_pair();

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    device.send(b"\x05ping").unwrap();
    assert_eq!(recv_packet(&device), b"\x05ping");

    assert!(wait_for(|| tunnel.session_counts().udp == 0));
    assert_eq!(count(&counters.released), 1);
    assert!(tunnel.is_running());

    // A new packet on the same flow opens a fresh session
    device.send(b"\x05again").unwrap();
    assert_eq!(recv_packet(&device), b"\x05again");
    assert_eq!(count(&counters.replies), 2);

    let stats = tunnel.stop().unwrap().expect("run stats");
    assert!(stats.evicted >= 1);
    assert!(stats.sweeps >= 2);
}

#[test]
fn test_saturated_registry_evicts_immediately() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(3600));
    let (tun, device) = interface_pair();

    let mut config = Config::default();
    config.tunnel.reactor.max_sessions = 1;
    let tunnel = Tunnel::new(config);
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    // At capacity the scaled timeout is zero, so the idle session goes on
    // the next sweep despite the hour-long base timeout
    device.send(b"\x07full").unwrap();
    assert!(wait_for(|| count(&counters.inbound) == 1));
    assert!(wait_for(|| tunnel.session_counts().udp == 0));
    assert_eq!(count(&counters.released), 1);

    tunnel.stop().unwrap();
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_stop_request_wins_over_pending_interface_data() {
    let echo = EchoServer::start();
    let (handlers, counters) = relay_handlers(echo.addr(), Duration::from_secs(60));
    let (tun, device) = interface_pair();
    device.send(b"\x01never read").unwrap();

    let waker = Arc::new(Waker::new().unwrap());
    let run = RunContext::new(
        tun,
        ProxyConfig::default(),
        Arc::new(NoopHostBridge),
        Arc::clone(&waker),
    )
    .unwrap();
    run.request_stop().unwrap();

    let registry = Arc::new(parking_lot::Mutex::new(SessionRegistry::new()));
    let event_loop = EventLoop::new(run, registry, handlers, ReactorConfig::default()).unwrap();
    let stats = event_loop.run().unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.iterations, 1);
    assert_eq!(count(&counters.inbound), 0);
}

#[test]
fn test_stop_interrupts_long_wait() {
    let (handlers, _counters) = relay_handlers("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
    let (tun, _device) = interface_pair();

    let mut config = Config::default();
    config.tunnel.reactor.default_timeout_secs = 3600;
    let tunnel = Tunnel::new(config);
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();

    // Let the reactor settle into its long wait
    std::thread::sleep(Duration::from_millis(200));

    let started = std::time::Instant::now();
    let stats = tunnel.stop().unwrap().expect("run stats");
    assert!(stats.cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_run_releases_interface_fd() {
    let (handlers, _counters) = relay_handlers("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
    let (tun, device) = interface_pair();

    let tunnel = Tunnel::new(Config::default());
    tunnel
        .start(RunConfig::new(tun), handlers, Arc::new(NoopHostBridge))
        .unwrap();
    tunnel.stop().unwrap();

    // The run dropped its end of the pair
    assert!(device.send(b"\x01late").is_err());
}
