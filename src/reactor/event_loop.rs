//! Readiness reactor loop
//!
//! One `EventLoop` drives one tunnel run on a dedicated thread. Each iteration:
//!
//! 1. Locks the registry, counts live sessions and brings poller registrations
//!    in line with the sessions' sockets.
//! 2. Sweeps finished sessions when the minimum sweep interval has passed and
//!    derives the wait timeout from the nearest idle deadline. Otherwise the
//!    wait is capped at the minimum interval so the skipped sweep runs soon.
//! 3. Waits for readiness with the registry unlocked.
//! 4. Locks the registry again and dispatches the batch. A cancellation in
//!    the batch wins over every other event in it.
//!
//! Whatever ends the loop, live sessions are terminated and all sessions are
//! cleared before `run` returns.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::eviction;
use super::limits;
use super::poller::{is_readable, Event, Events, Interest, Poller, INTERFACE_TOKEN, WAKER_TOKEN};
use crate::config::ReactorConfig;
use crate::context::{InterfaceContext, Load, RunContext, SweepContext};
use crate::error::ReactorError;
use crate::handler::{Handlers, Readiness};
use crate::session::{Protocol, SessionId, SessionRegistry};

/// Counters for one completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Loop iterations, including interrupted waits
    pub iterations: u64,
    /// Eviction sweeps performed
    pub sweeps: u64,
    /// Sessions evicted by sweeps
    pub evicted: u64,
    /// Whether the run ended through the cancellation channel
    pub cancelled: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// Reactor loop of one tunnel run
pub struct EventLoop {
    run: RunContext,
    sessions: Arc<Mutex<SessionRegistry>>,
    handlers: Handlers,
    poller: Arc<Poller>,
    config: ReactorConfig,
    capacity: usize,
}

impl EventLoop {
    /// Set up the poller with the interface and the run's waker
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError`] if the poller cannot be created or either
    /// descriptor cannot be registered.
    pub fn new(
        run: RunContext,
        sessions: Arc<Mutex<SessionRegistry>>,
        handlers: Handlers,
        config: ReactorConfig,
    ) -> Result<Self, ReactorError> {
        let poller = Poller::new().map_err(|e| ReactorError::setup("poller", e))?;

        let waker_fd = run.waker().as_raw_fd();
        poller
            .add(waker_fd, WAKER_TOKEN, Interest::READABLE)
            .map_err(|e| ReactorError::poller("add", waker_fd, e))?;

        let interface_fd = run.interface_fd();
        poller
            .add(interface_fd, INTERFACE_TOKEN, Interest::READABLE)
            .map_err(|e| ReactorError::poller("add", interface_fd, e))?;

        let capacity = limits::session_capacity(&config);

        Ok(Self {
            run,
            sessions,
            handlers,
            poller: Arc::new(poller),
            config,
            capacity,
        })
    }

    /// Override the live-session capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Live-session capacity used for load shedding
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run until cancelled or a handler fails
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Handler`] when a handler fails and
    /// [`ReactorError::Wait`] when waiting fails for a reason other than an
    /// interruption. Sessions are cleared in both cases.
    pub fn run(mut self) -> Result<RunStats, ReactorError> {
        let registry = Arc::clone(&self.sessions);
        let mut events = Events::with_capacity(self.config.max_events);
        let mut stats = RunStats::default();
        let mut last_sweep: Option<Instant> = None;

        info!(
            interface = self.run.interface_fd(),
            capacity = self.capacity,
            "Reactor started"
        );

        let result = loop {
            stats.iterations += 1;

            let (timeout, load) = {
                let mut sessions = registry.lock();
                let counts = sessions.live_counts();
                let load = Load::new(counts.total(), self.capacity);
                self.monitor(&mut sessions);

                let now = Instant::now();
                let min_interval = self.config.min_sweep_interval();
                let due = last_sweep.map_or(true, |at| now.duration_since(at) > min_interval);

                let timeout = if due {
                    last_sweep = Some(now);
                    stats.sweeps += 1;
                    let cx = SweepContext {
                        run: &self.run,
                        load,
                        now,
                    };
                    let outcome =
                        eviction::sweep(&mut sessions, &mut self.handlers, &cx);
                    stats.evicted += outcome.evicted as u64;

                    outcome
                        .next_deadline
                        .map_or(self.config.default_timeout(), |deadline| {
                            deadline
                                .saturating_duration_since(now)
                                .min(self.config.default_timeout())
                        })
                } else {
                    trace!("Skipped session checks");
                    min_interval
                };

                debug!(
                    icmp = counts.icmp,
                    udp = counts.udp,
                    tcp = counts.tcp,
                    live = load.live,
                    capacity = load.capacity,
                    timeout_ms = timeout.as_millis() as u64,
                    "Reactor iteration"
                );

                (timeout, load)
            };

            match self.poller.wait(&mut events, Some(timeout)) {
                Ok(0) => {
                    trace!("Wait timed out");
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("Wait interrupted");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Wait failed");
                    break Err(ReactorError::Wait(e));
                }
            }

            let flow = {
                let mut sessions = registry.lock();
                self.dispatch(&mut sessions, &events, load)
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    stats.cancelled = true;
                    break Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Dispatch failed, stopping reactor");
                    break Err(e);
                }
            }
        };

        self.shutdown(&mut registry.lock());

        info!(
            iterations = stats.iterations,
            sweeps = stats.sweeps,
            evicted = stats.evicted,
            cancelled = stats.cancelled,
            "Reactor stopped"
        );

        result.map(|()| stats)
    }

    /// Keep poller registrations in line with session sockets
    ///
    /// Sockets leave the poller when they leave their session, so only new
    /// sockets and interest changes are handled here.
    fn monitor(&mut self, sessions: &mut SessionRegistry) {
        for (id, session) in sessions.iter_mut() {
            let Some(fd) = session.socket_fd() else {
                continue;
            };
            let desired = self
                .handlers
                .get(session.protocol())
                .desired_interest(session);

            match session.registered_interest() {
                Some(current) if current == desired => {}
                Some(_) => match self.poller.modify(fd, id.token(), desired) {
                    Ok(()) => {
                        trace!(fd, flow = %session.key(), ?desired, "Session interest updated");
                        session.mark_registered(&self.poller, desired);
                    }
                    Err(e) => warn!(fd, flow = %session.key(), error = %e, "Failed to update interest"),
                },
                None => match self.register(fd, id, desired) {
                    Ok(()) => {
                        trace!(fd, flow = %session.key(), "Session socket registered");
                        session.mark_registered(&self.poller, desired);
                    }
                    Err(e) => warn!(fd, flow = %session.key(), error = %e, "Failed to register socket"),
                },
            }
        }
    }

    fn register(&self, fd: RawFd, id: SessionId, interest: Interest) -> io::Result<()> {
        match self.poller.add(fd, id.token(), interest) {
            // Already in the poller; adopt the entry
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                self.poller.modify(fd, id.token(), interest)
            }
            other => other,
        }
    }

    fn dispatch(
        &mut self,
        sessions: &mut SessionRegistry,
        events: &Events,
        load: Load,
    ) -> Result<Flow, ReactorError> {
        if events.iter().any(|e| e.token() == WAKER_TOKEN) {
            match self.run.waker().drain() {
                Ok(_) => trace!("Waker drained"),
                Err(e) => warn!(error = %e, "Failed to drain waker"),
            }
            info!("Stop requested");
            return Ok(Flow::Stop);
        }

        for event in events.iter() {
            match event.token() {
                INTERFACE_TOKEN => self.drain_interface(sessions, load)?,
                token => self.dispatch_session(sessions, SessionId::from_token(token), event)?,
            }
        }

        Ok(Flow::Continue)
    }

    fn drain_interface(
        &mut self,
        sessions: &mut SessionRegistry,
        load: Load,
    ) -> Result<(), ReactorError> {
        let fd = self.run.interface_fd();
        while is_readable(fd) {
            let mut cx = InterfaceContext::new(&self.run, &mut *sessions, load);
            self.handlers.inbound.on_interface_data(&mut cx)?;
        }
        Ok(())
    }

    fn dispatch_session(
        &mut self,
        sessions: &mut SessionRegistry,
        id: SessionId,
        event: Event,
    ) -> Result<(), ReactorError> {
        let Some(session) = sessions.get_mut(id) else {
            trace!(session = %id, "Event for removed session");
            return Ok(());
        };
        let Some(fd) = session.socket_fd() else {
            trace!(flow = %session.key(), "Event for session without socket");
            return Ok(());
        };

        let readiness = Readiness::from(event);
        trace!(
            flow = %session.key(),
            readable = readiness.readable,
            writable = readiness.writable,
            error = readiness.error,
            hangup = readiness.hangup,
            "Session ready"
        );

        let protocol = session.protocol();
        let handler = self.handlers.for_protocol(protocol);
        match protocol {
            Protocol::Udp => {
                while !readiness.error && readiness.readable && is_readable(fd) {
                    handler.on_socket_event(&self.run, session, readiness)?;
                    if session.socket_fd() != Some(fd) {
                        break;
                    }
                }
            }
            Protocol::Icmp | Protocol::Tcp => {
                handler.on_socket_event(&self.run, session, readiness)?;
            }
        }

        Ok(())
    }

    fn shutdown(&mut self, sessions: &mut SessionRegistry) {
        let terminated =
            eviction::terminate_all(sessions, &mut self.handlers, &self.run);
        let cleared = eviction::clear(sessions, &mut self.handlers);

        for (name, fd) in [
            ("interface", self.run.interface_fd()),
            ("waker", self.run.waker().as_raw_fd()),
        ] {
            if let Err(e) = self.poller.delete(fd) {
                debug!(fd, error = %e, "Failed to deregister {}", name);
            }
        }

        debug!(terminated, cleared, "Sessions cleared");
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("run", &self.run)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
