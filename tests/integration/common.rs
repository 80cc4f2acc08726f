//! Shared fixtures: interface pairs, an echo server and relay handlers
//!
//! Packets on the fake interface are `[flow, payload..]`. The inbound relay
//! maps `flow` to a UDP session from `10.0.0.2:(40000 + flow)` and forwards the
//! payload upstream; replies come back as `[flow, reply..]`.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tun_proxy::context::{InterfaceContext, Load, RunContext, SweepContext};
use tun_proxy::error::HandlerError;
use tun_proxy::handler::{Handlers, InboundHandler, ProtocolHandler, Readiness};
use tun_proxy::session::{FlowKey, Protocol, Session, UdpPhase};

pub const FLOW_BASE_PORT: u16 = 40_000;

/// A datagram pair: the first end goes to the tunnel, the second plays the device
pub fn interface_pair() -> (OwnedFd, UnixDatagram) {
    let (tun, device) = UnixDatagram::pair().expect("socket pair");
    device
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    (OwnedFd::from(tun), device)
}

/// Poll `condition` for up to five seconds
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// UDP echo server on loopback
pub struct EchoServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EchoServer {
    pub fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind echo server");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("read timeout");
        let addr = socket.local_addr().expect("local addr");
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while !flag.load(Ordering::Relaxed) {
                if let Ok((n, peer)) = socket.recv_from(&mut buf) {
                    let _ = socket.send_to(&buf[..n], peer);
                }
            }
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Observations made by the relay handlers
#[derive(Debug, Default)]
pub struct Counters {
    pub inbound: AtomicUsize,
    pub replies: AtomicUsize,
    pub released: AtomicUsize,
}

/// Current value of a counter
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn session_socket(session: &Session) -> io::Result<UdpSocket> {
    let fd = session
        .socket()
        .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
    Ok(UdpSocket::from(fd.try_clone_to_owned()?))
}

/// Reads device packets and forwards them over per-flow UDP sessions
pub struct RelayInbound {
    upstream: SocketAddr,
    counters: Arc<Counters>,
}

impl RelayInbound {
    fn flow_key(&self, flow: u8) -> FlowKey {
        let source = SocketAddr::from(([10, 0, 0, 2], FLOW_BASE_PORT + u16::from(flow)));
        FlowKey::new(Protocol::Udp, source, self.upstream)
    }
}

impl InboundHandler for RelayInbound {
    fn on_interface_data(&mut self, cx: &mut InterfaceContext<'_>) -> Result<(), HandlerError> {
        let mut buf = vec![0u8; cx.run.mtu()];
        let n = cx.run.read_packet(&mut buf).map_err(HandlerError::Interface)?;
        self.counters.inbound.fetch_add(1, Ordering::SeqCst);
        let Some((&flow, payload)) = buf[..n].split_first() else {
            return Ok(());
        };

        let key = self.flow_key(flow);
        let id = match cx.lookup(&key) {
            Some(id) => id,
            None => {
                let socket = UdpSocket::bind("127.0.0.1:0")?;
                socket.connect(self.upstream)?;
                socket.set_nonblocking(true)?;

                let mut session = Session::udp(key.source, key.destination);
                let _ = session.attach_socket(OwnedFd::from(socket));
                cx.insert(session)
                    .map_err(|e| HandlerError::session(&key, e.to_string()))?
            }
        };

        if let Some(session) = cx.get_mut(id) {
            session_socket(session)?.send(payload)?;
            session.touch();
        }
        Ok(())
    }
}

/// Writes upstream replies back to the device and evicts idle flows
pub struct RelayUdp {
    idle: Duration,
    counters: Arc<Counters>,
}

impl ProtocolHandler for RelayUdp {
    fn check(&mut self, cx: &SweepContext<'_>, session: &mut Session) -> bool {
        let finished = session
            .udp_state_mut()
            .map_or(true, |udp| udp.phase != UdpPhase::Active);
        finished || session.idle_for(cx.now) > self.timeout(session, cx.load)
    }

    fn timeout(&self, _session: &Session, load: Load) -> Duration {
        load.scale(self.idle)
    }

    fn on_socket_event(
        &mut self,
        run: &RunContext,
        session: &mut Session,
        _event: Readiness,
    ) -> Result<(), HandlerError> {
        let socket = session_socket(session)?;
        let mut buf = [0u8; 2048];
        let n = match socket.recv(&mut buf[1..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(HandlerError::session(session.key(), e.to_string())),
        };

        let port = session.key().source.port();
        buf[0] = u8::try_from(port - FLOW_BASE_PORT).unwrap_or(u8::MAX);
        run.write_packet(&buf[..=n]).map_err(HandlerError::Interface)?;
        session.touch();
        self.counters.replies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self, _session: &mut Session) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handler for protocols the fixtures never open
pub struct Passive;

impl ProtocolHandler for Passive {
    fn check(&mut self, _cx: &SweepContext<'_>, _session: &mut Session) -> bool {
        false
    }

    fn timeout(&self, _session: &Session, load: Load) -> Duration {
        load.scale(Duration::from_secs(60))
    }

    fn on_socket_event(
        &mut self,
        _run: &RunContext,
        _session: &mut Session,
        _event: Readiness,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Relay handlers towards `upstream` with the given UDP idle timeout
pub fn relay_handlers(upstream: SocketAddr, idle: Duration) -> (Handlers, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let handlers = Handlers::new(
        Box::new(Passive),
        Box::new(RelayUdp {
            idle,
            counters: Arc::clone(&counters),
        }),
        Box::new(Passive),
        Box::new(RelayInbound {
            upstream,
            counters: Arc::clone(&counters),
        }),
    );
    (handlers, counters)
}
