//! Protocol and inbound handler traits

use std::time::Duration;

use crate::context::{InterfaceContext, Load, RunContext, SweepContext};
use crate::error::HandlerError;
use crate::reactor::{Event, Interest};
use crate::session::{Protocol, Session};

/// Readiness reported for a session socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl From<Event> for Readiness {
    fn from(event: Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            hangup: event.is_hangup(),
        }
    }
}

/// Per-protocol session behaviour
///
/// One implementation exists for each of ICMP, UDP and TCP. All methods run on
/// the reactor thread with the session registry locked, so they must not block.
pub trait ProtocolHandler: Send {
    /// Whether the session is finished or must be evicted now
    ///
    /// Called once per session on every sweep. Returning `true` removes the
    /// session.
    fn check(&mut self, cx: &SweepContext<'_>, session: &mut Session) -> bool;

    /// Allowed idle time for the session under the given load
    fn timeout(&self, session: &Session, load: Load) -> Duration;

    /// Handle readiness of the session's socket
    ///
    /// # Errors
    ///
    /// An error ends the tunnel run.
    fn on_socket_event(
        &mut self,
        run: &RunContext,
        session: &mut Session,
        event: Readiness,
    ) -> Result<(), HandlerError>;

    /// Free protocol-owned state before the session is dropped
    fn release(&mut self, session: &mut Session) {
        if let Some(tcp) = session.tcp_state_mut() {
            tcp.data = None;
        }
    }

    /// Readiness the session's socket should be registered for
    fn desired_interest(&self, _session: &Session) -> Interest {
        Interest::READABLE
    }

    /// Tear down a live session when the run ends (e.g. send a TCP reset)
    fn terminate(&mut self, _run: &RunContext, _session: &mut Session) {}
}

/// Reader of the virtual interface
pub trait InboundHandler: Send {
    /// Consume one readable unit from the interface
    ///
    /// Called repeatedly while the interface stays readable. New sessions are
    /// inserted through [`InterfaceContext::insert`]; finished ones are left
    /// for the sweep to free.
    ///
    /// # Errors
    ///
    /// An error ends the tunnel run.
    fn on_interface_data(&mut self, cx: &mut InterfaceContext<'_>) -> Result<(), HandlerError>;
}

/// The set of handlers driven by one tunnel run
pub struct Handlers {
    pub icmp: Box<dyn ProtocolHandler>,
    pub udp: Box<dyn ProtocolHandler>,
    pub tcp: Box<dyn ProtocolHandler>,
    pub inbound: Box<dyn InboundHandler>,
}

impl Handlers {
    /// Bundle handlers
    #[must_use]
    pub fn new(
        icmp: Box<dyn ProtocolHandler>,
        udp: Box<dyn ProtocolHandler>,
        tcp: Box<dyn ProtocolHandler>,
        inbound: Box<dyn InboundHandler>,
    ) -> Self {
        Self {
            icmp,
            udp,
            tcp,
            inbound,
        }
    }

    /// Handler for a protocol tag
    pub fn for_protocol(&mut self, protocol: Protocol) -> &mut dyn ProtocolHandler {
        match protocol {
            Protocol::Icmp => self.icmp.as_mut(),
            Protocol::Udp => self.udp.as_mut(),
            Protocol::Tcp => self.tcp.as_mut(),
        }
    }

    /// Shared access to a protocol handler
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> &dyn ProtocolHandler {
        match protocol {
            Protocol::Icmp => self.icmp.as_ref(),
            Protocol::Udp => self.udp.as_ref(),
            Protocol::Tcp => self.tcp.as_ref(),
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}
