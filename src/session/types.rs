//! Session data types

use std::any::Any;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::reactor::{Interest, Poller};

/// Transport protocol of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Udp,
    Tcp,
}

impl Protocol {
    /// IP protocol number (ICMPv6 for IPv6 ICMP flows)
    #[must_use]
    pub const fn ip_number(self, version: IpVersion) -> u8 {
        match (self, version) {
            (Self::Icmp, IpVersion::V4) => 1,
            (Self::Icmp, IpVersion::V6) => 58,
            (Self::Udp, _) => 17,
            (Self::Tcp, _) => 6,
        }
    }

    /// Short lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Icmp => "icmp",
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP version of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl From<IpAddr> for IpVersion {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

/// Identity tuple of a flow
///
/// ICMP flows carry the echo identifier in both port positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub protocol: Protocol,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl FlowKey {
    /// Create a new flow key
    #[must_use]
    pub const fn new(protocol: Protocol, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            protocol,
            source,
            destination,
        }
    }

    /// Create an ICMP flow key from the echo identifier
    #[must_use]
    pub const fn icmp(source: IpAddr, destination: IpAddr, ident: u16) -> Self {
        Self::new(
            Protocol::Icmp,
            SocketAddr::new(source, ident),
            SocketAddr::new(destination, ident),
        )
    }

    /// IP version of the flow (taken from the source address)
    #[must_use]
    pub fn ip_version(&self) -> IpVersion {
        self.source.ip().into()
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.protocol, self.source, self.destination)
    }
}

/// ICMP sub-state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcmpState {
    /// Set once the flow must no longer be relayed
    pub stop: bool,
}

/// UDP flow phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum UdpPhase {
    #[default]
    Active,
    /// Winding down; no new datagrams are relayed
    Finishing,
    /// Socket closed, waiting for removal
    Closed,
    /// Refused by policy
    Blocked,
}

/// UDP sub-state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpState {
    pub phase: UdpPhase,
}

/// TCP connection phase as tracked by the TCP handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TcpPhase {
    Listen,
    SynRecv,
    SynSent,
    Established,
    CloseWait,
    LastAck,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    Close,
}

impl TcpPhase {
    /// `Closing` and `Close` end the connection
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Close)
    }
}

/// TCP sub-state
///
/// `data` holds whatever the TCP handler keeps per connection (sequence
/// numbers, pending segments). The core never looks inside it; it is dropped
/// when the session is released.
pub struct TcpState {
    pub phase: TcpPhase,
    pub data: Option<Box<dyn Any + Send>>,
}

impl TcpState {
    /// Create a TCP sub-state with no handler data
    #[must_use]
    pub const fn new(phase: TcpPhase) -> Self {
        Self { phase, data: None }
    }
}

impl fmt::Debug for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpState")
            .field("phase", &self.phase)
            .field("data", &self.data.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Protocol-specific sub-state
#[derive(Debug)]
pub enum ProtocolState {
    Icmp(IcmpState),
    Udp(UdpState),
    Tcp(TcpState),
}

impl ProtocolState {
    /// Protocol tag of this state
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Icmp(_) => Protocol::Icmp,
            Self::Udp(_) => Protocol::Udp,
            Self::Tcp(_) => Protocol::Tcp,
        }
    }

    /// Liveness predicate
    #[must_use]
    pub const fn is_live(&self) -> bool {
        match self {
            Self::Icmp(s) => !s.stop,
            Self::Udp(s) => matches!(s.phase, UdpPhase::Active),
            Self::Tcp(s) => !s.phase.is_terminal(),
        }
    }
}

/// A session socket's entry in the reactor's poller
#[derive(Debug)]
struct Registration {
    poller: Arc<Poller>,
    interest: Interest,
}

/// One active flow through the tunnel
///
/// While registered, the socket is removed from the poller before it leaves
/// the session, whether it is detached, replaced or dropped with the session.
/// A descriptor handed back to a handler never carries a live registration.
#[derive(Debug)]
pub struct Session {
    key: FlowKey,
    socket: Option<OwnedFd>,
    /// Protocol-specific sub-state, owned by the protocol handler
    pub state: ProtocolState,
    last_activity: Instant,
    created_at: Instant,
    uid: Option<u32>,
    registration: Option<Registration>,
}

impl Session {
    fn new(key: FlowKey, state: ProtocolState) -> Self {
        debug_assert_eq!(key.protocol, state.protocol());
        let now = Instant::now();
        Self {
            key,
            socket: None,
            state,
            last_activity: now,
            created_at: now,
            uid: None,
            registration: None,
        }
    }

    /// Create an ICMP session
    #[must_use]
    pub fn icmp(source: IpAddr, destination: IpAddr, ident: u16) -> Self {
        Self::new(
            FlowKey::icmp(source, destination, ident),
            ProtocolState::Icmp(IcmpState::default()),
        )
    }

    /// Create an active UDP session
    #[must_use]
    pub fn udp(source: SocketAddr, destination: SocketAddr) -> Self {
        Self::new(
            FlowKey::new(Protocol::Udp, source, destination),
            ProtocolState::Udp(UdpState::default()),
        )
    }

    /// Create a TCP session in the given phase
    #[must_use]
    pub fn tcp(source: SocketAddr, destination: SocketAddr, phase: TcpPhase) -> Self {
        Self::new(
            FlowKey::new(Protocol::Tcp, source, destination),
            ProtocolState::Tcp(TcpState::new(phase)),
        )
    }

    /// Identity tuple
    #[must_use]
    pub const fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Protocol tag
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.key.protocol
    }

    /// Whether the session counts towards the live-session ceiling
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Upstream socket, if one has been opened
    #[must_use]
    pub fn socket(&self) -> Option<BorrowedFd<'_>> {
        self.socket.as_ref().map(AsFd::as_fd)
    }

    /// Raw descriptor of the upstream socket
    #[must_use]
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Attach an upstream socket, returning the one it replaces
    ///
    /// The replaced socket is deregistered first. The reactor registers the
    /// new socket on its next iteration.
    pub fn attach_socket(&mut self, socket: OwnedFd) -> Option<OwnedFd> {
        self.deregister();
        self.socket.replace(socket)
    }

    /// Detach the upstream socket
    ///
    /// The socket is deregistered before it is returned, so keeping the
    /// descriptor open produces no further readiness events.
    pub fn take_socket(&mut self) -> Option<OwnedFd> {
        self.deregister();
        self.socket.take()
    }

    /// Interest the socket is currently registered for
    pub(crate) fn registered_interest(&self) -> Option<Interest> {
        self.registration.as_ref().map(|r| r.interest)
    }

    /// Record that the socket is registered with `poller` for `interest`
    pub(crate) fn mark_registered(&mut self, poller: &Arc<Poller>, interest: Interest) {
        self.registration = Some(Registration {
            poller: Arc::clone(poller),
            interest,
        });
    }

    /// Remove the socket from the poller it is registered with
    pub(crate) fn deregister(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        if let Some(fd) = self.socket_fd() {
            if let Err(e) = registration.poller.delete(fd) {
                debug!(fd, flow = %self.key, error = %e, "Failed to deregister session socket");
            }
        }
    }

    /// Time of the last observed activity
    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record activity now
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record activity at a given instant
    pub fn touch_at(&mut self, at: Instant) {
        self.last_activity = at;
    }

    /// Time since the last activity
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Attributed application uid
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Set the attributed application uid
    pub fn set_uid(&mut self, uid: Option<u32>) {
        self.uid = uid;
    }

    /// ICMP sub-state, if this is an ICMP session
    pub fn icmp_state_mut(&mut self) -> Option<&mut IcmpState> {
        match &mut self.state {
            ProtocolState::Icmp(s) => Some(s),
            _ => None,
        }
    }

    /// UDP sub-state, if this is a UDP session
    pub fn udp_state_mut(&mut self) -> Option<&mut UdpState> {
        match &mut self.state {
            ProtocolState::Udp(s) => Some(s),
            _ => None,
        }
    }

    /// TCP sub-state, if this is a TCP session
    pub fn tcp_state_mut(&mut self) -> Option<&mut TcpState> {
        match &mut self.state {
            ProtocolState::Tcp(s) => Some(s),
            _ => None,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.deregister();
    }
}
