//! Per-run state shared by the reactor and the handlers
//!
//! Everything a tunnel run needs travels in a [`RunContext`] owned by that run:
//! the interface descriptor, proxy parameters, host bridge, capture sink and
//! the run's cancellation waker. Nothing here is process-global, so sequential
//! runs never see each other's state.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{CaptureConfig, ProxyConfig};
use crate::error::{HostError, RegistryError};
use crate::handler::{HostBridge, PacketCapture, PROTECT_BELOW_VERSION};
use crate::http::HttpRewriter;
use crate::reactor::Waker;
use crate::session::{FlowKey, Session, SessionCounts, SessionId, SessionRegistry};

/// Interface MTU used when none is given
pub const DEFAULT_MTU: usize = 10_000;

/// Context of one tunnel run
pub struct RunContext {
    interface: OwnedFd,
    proxy: ProxyConfig,
    host: Arc<dyn HostBridge>,
    capture: Option<Arc<dyn PacketCapture>>,
    capture_config: CaptureConfig,
    waker: Arc<Waker>,
    mtu: usize,
}

impl RunContext {
    /// Create a run context
    ///
    /// The interface descriptor is switched to blocking mode; the reactor only
    /// reads it once it is known to be readable.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the descriptor flags cannot be changed.
    pub fn new(
        interface: OwnedFd,
        proxy: ProxyConfig,
        host: Arc<dyn HostBridge>,
        waker: Arc<Waker>,
    ) -> io::Result<Self> {
        set_blocking(interface.as_raw_fd())?;
        Ok(Self {
            interface,
            proxy,
            host,
            capture: None,
            capture_config: CaptureConfig::default(),
            waker,
            mtu: DEFAULT_MTU,
        })
    }

    /// Attach a capture sink
    #[must_use]
    pub fn with_capture(mut self, sink: Arc<dyn PacketCapture>, config: CaptureConfig) -> Self {
        self.capture = Some(sink);
        self.capture_config = config;
        self
    }

    /// Set the interface MTU
    #[must_use]
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Raw interface descriptor
    #[must_use]
    pub fn interface_fd(&self) -> RawFd {
        self.interface.as_raw_fd()
    }

    /// Proxy parameters of this run
    #[must_use]
    pub const fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    /// Host bridge
    #[must_use]
    pub fn host(&self) -> &dyn HostBridge {
        self.host.as_ref()
    }

    /// Interface MTU
    #[must_use]
    pub const fn mtu(&self) -> usize {
        self.mtu
    }

    /// HTTP rewriter sized for this run's MTU
    #[must_use]
    pub const fn rewriter(&self) -> HttpRewriter {
        HttpRewriter::for_mtu(self.mtu)
    }

    /// Read one packet from the interface
    ///
    /// # Errors
    ///
    /// Returns the OS error if the read fails.
    pub fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::read(
                self.interface.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        #[allow(clippy::cast_sign_loss)]
        let len = ret as usize;
        if len > 0 {
            self.capture(&buf[..len]);
        }
        Ok(len)
    }

    /// Write one packet to the interface
    ///
    /// # Errors
    ///
    /// Returns the OS error if the write fails.
    pub fn write_packet(&self, packet: &[u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::write(
                self.interface.as_raw_fd(),
                packet.as_ptr().cast::<libc::c_void>(),
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        self.capture(packet);
        #[allow(clippy::cast_sign_loss)]
        Ok(ret as usize)
    }

    /// Protect an upstream socket from the tunnel's own routing
    ///
    /// Only older host platforms need this; on newer ones the call is skipped.
    ///
    /// # Errors
    ///
    /// Returns the host error when protection was needed and failed. The
    /// caller must abandon the session's setup.
    pub fn protect_socket(&self, fd: RawFd) -> Result<(), HostError> {
        if self.host.platform_version() >= PROTECT_BELOW_VERSION {
            return Ok(());
        }
        self.host.protect(fd).map_err(|e| {
            warn!(fd, error = %e, "Socket protection failed");
            e
        })
    }

    /// Application uid owning a flow; lookup failures are logged
    #[must_use]
    pub fn uid_for(&self, flow: &FlowKey) -> Option<u32> {
        match self.host.uid_for(flow) {
            Ok(uid) => uid,
            Err(e) => {
                debug!(%flow, error = %e, "uid lookup failed");
                None
            }
        }
    }

    /// Send a packet to the capture sink, if one is attached
    pub fn capture(&self, packet: &[u8]) {
        if let Some(sink) = &self.capture {
            let len = self
                .capture_config
                .record_size
                .map_or(packet.len(), |max| packet.len().min(max));
            sink.record(&packet[..len]);
        }
    }

    /// Ask the reactor to stop at its next wake point
    ///
    /// # Errors
    ///
    /// Returns the OS error if the waker cannot be signalled.
    pub fn request_stop(&self) -> io::Result<()> {
        self.waker.wake()
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("interface", &self.interface)
            .field("proxy", &self.proxy)
            .field("capture", &self.capture.is_some())
            .field("mtu", &self.mtu)
            .finish_non_exhaustive()
    }
}

fn set_blocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        return Ok(());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Live-session load at the time of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    pub live: usize,
    pub capacity: usize,
}

impl Load {
    /// Create a load figure
    #[must_use]
    pub const fn new(live: usize, capacity: usize) -> Self {
        Self { live, capacity }
    }

    /// Scale a base timeout down as the registry fills up
    ///
    /// `base × (100 − live×100/capacity) / 100`, reaching zero at capacity.
    #[must_use]
    pub fn scale(self, base: Duration) -> Duration {
        let capacity = self.capacity.max(1);
        let used = (self.live.saturating_mul(100) / capacity).min(100);
        let remaining = u32::try_from(100 - used).unwrap_or(0);
        base.saturating_mul(remaining) / 100
    }

    /// Whether the live-session ceiling has been reached
    #[must_use]
    pub const fn is_saturated(self) -> bool {
        self.live >= self.capacity
    }
}

/// Context handed to [`ProtocolHandler::check`](crate::handler::ProtocolHandler::check)
#[derive(Debug, Clone, Copy)]
pub struct SweepContext<'a> {
    pub run: &'a RunContext,
    pub load: Load,
    pub now: Instant,
}

/// Context handed to the inbound handler
///
/// The inbound handler opens and updates sessions but never frees them:
/// sessions are only removed by the eviction engine, which deregisters the
/// socket and runs the protocol handler's `release`. To end a session, move
/// it to a finished state and let the next sweep collect it.
#[derive(Debug)]
pub struct InterfaceContext<'a> {
    pub run: &'a RunContext,
    pub load: Load,
    sessions: &'a mut SessionRegistry,
}

impl<'a> InterfaceContext<'a> {
    pub(crate) fn new(run: &'a RunContext, sessions: &'a mut SessionRegistry, load: Load) -> Self {
        Self {
            run,
            load,
            sessions,
        }
    }

    /// Register a new session
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the identity tuple is already in use.
    pub fn insert(&mut self, session: Session) -> Result<SessionId, RegistryError> {
        self.sessions.insert(session)
    }

    /// Handle of the session with this identity tuple
    #[must_use]
    pub fn lookup(&self, key: &FlowKey) -> Option<SessionId> {
        self.sessions.lookup(key)
    }

    /// Session for a handle
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Mutable session for a handle
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Live sessions per protocol
    #[must_use]
    pub fn live_counts(&self) -> SessionCounts {
        self.sessions.live_counts()
    }
}
