//! Tunnel lifecycle
//!
//! A [`Tunnel`] owns at most one reactor thread at a time. Starting a run
//! builds a fresh [`RunContext`](crate::context::RunContext), session registry
//! and cancellation waker, then hands them to an
//! [`EventLoop`](crate::reactor::EventLoop) on a dedicated thread.
//!
//! # Lifecycle
//!
//! ```text
//!            start                 stop / loop error
//!   Idle ───────────► Running ─────────────────────► Idle
//!     │                  │
//!     └──── teardown ────┴──► TornDown (start refused)
//! ```
//!
//! `stop` wakes the reactor through its waker and joins the thread, so when it
//! returns every session of the run has been terminated and cleared.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tun_proxy::config::Config;
//! use tun_proxy::handler::{Handlers, NoopHostBridge};
//! use tun_proxy::tunnel::{RunConfig, Tunnel};
//!
//! # fn example(interface: std::os::fd::OwnedFd, handlers: Handlers) -> tun_proxy::Result<()> {
//! let tunnel = Tunnel::new(Config::default());
//! tunnel.start(RunConfig::new(interface), handlers, Arc::new(NoopHostBridge))?;
//! // ...
//! let _stats = tunnel.stop()?;
//! tunnel.teardown()?;
//! # Ok(())
//! # }
//! ```

mod worker;

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{Config, ProxyConfig};
use crate::context::RunContext;
use crate::error::{ReactorError, TunnelError};
use crate::handler::{Handlers, HostBridge, PacketCapture};
use crate::http::HttpRewriter;
use crate::logging::LogHandle;
use crate::reactor::{self, EventLoop, RunStats, Waker};
use crate::session::{SessionCounts, SessionRegistry};

pub use worker::WORKER_THREAD_NAME;
use worker::Worker;

/// Parameters of one tunnel run
pub struct RunConfig {
    /// Virtual interface descriptor carrying raw IP packets
    pub interface: OwnedFd,
    /// DNS and SOCKS5 parameters; the tunnel's configured defaults when unset
    pub proxy: Option<ProxyConfig>,
    /// Log filter applied for this run
    pub log_level: Option<String>,
    /// Capture sink for packets crossing the interface
    pub capture: Option<Arc<dyn PacketCapture>>,
}

impl RunConfig {
    /// Run on `interface` with the tunnel's proxy parameters
    #[must_use]
    pub fn new(interface: OwnedFd) -> Self {
        Self {
            interface,
            proxy: None,
            log_level: None,
            capture: None,
        }
    }

    /// Set the proxy parameters
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set the log filter for the run
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Attach a capture sink
    #[must_use]
    pub fn with_capture(mut self, sink: Arc<dyn PacketCapture>) -> Self {
        self.capture = Some(sink);
        self
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("interface", &self.interface)
            .field("proxy", &self.proxy)
            .field("log_level", &self.log_level)
            .field("capture", &self.capture.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    worker: Option<Worker>,
    torn_down: bool,
}

/// Owner of the reactor thread
pub struct Tunnel {
    config: Config,
    lifecycle: Mutex<Lifecycle>,
    registry: RwLock<Arc<Mutex<SessionRegistry>>>,
    log: Option<LogHandle>,
}

impl Tunnel {
    /// Create a tunnel
    ///
    /// Raises the soft descriptor limit to the hard limit; failure to do so is
    /// logged and the current limit is kept.
    #[must_use]
    pub fn new(config: Config) -> Self {
        reactor::raise_nofile_limit();
        info!(mtu = config.tunnel.mtu, "Tunnel created");
        Self {
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
            registry: RwLock::new(Arc::new(Mutex::new(SessionRegistry::new()))),
            log: None,
        }
    }

    /// Use `handle` to apply each run's log level
    #[must_use]
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log = Some(handle);
        self
    }

    /// Tunnel configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Start a run on a new reactor thread
    ///
    /// # Errors
    ///
    /// - [`TunnelError::TornDown`] after [`teardown`](Self::teardown)
    /// - [`TunnelError::AlreadyRunning`] while the previous reactor thread is
    ///   still alive
    /// - [`TunnelError::Reactor`] if the reactor cannot be set up
    /// - [`TunnelError::Spawn`] if the thread cannot be created
    pub fn start(
        &self,
        run: RunConfig,
        handlers: Handlers,
        host: Arc<dyn HostBridge>,
    ) -> Result<(), TunnelError> {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.torn_down {
            return Err(TunnelError::TornDown);
        }

        if let Some(worker) = &lifecycle.worker {
            if worker.is_alive() {
                warn!(uptime_ms = worker.uptime().as_millis() as u64, "Tunnel already running");
                return Err(TunnelError::AlreadyRunning);
            }
        }

        // Reap a reactor that ended on its own
        if let Some(worker) = lifecycle.worker.take() {
            match worker.join() {
                Ok(stats) => debug!(?stats, "Reaped finished reactor"),
                Err(e) => warn!(error = %e, "Previous run ended with an error"),
            }
        }

        if let Some(level) = &run.log_level {
            self.apply_log_level(level);
        }

        let waker = Arc::new(Waker::new().map_err(|e| ReactorError::setup("waker", e))?);

        let proxy = run.proxy.unwrap_or_else(|| self.config.proxy.clone());
        let mut cx = RunContext::new(run.interface, proxy, host, Arc::clone(&waker))
            .map_err(|e| ReactorError::setup("interface", e))?
            .with_mtu(self.config.tunnel.mtu);
        if let Some(sink) = run.capture {
            cx = cx.with_capture(sink, self.config.capture.clone());
        }

        let registry = Arc::new(Mutex::new(SessionRegistry::new()));
        let event_loop = EventLoop::new(
            cx,
            Arc::clone(&registry),
            handlers,
            self.config.tunnel.reactor.clone(),
        )?;
        let capacity = event_loop.capacity();

        let worker = Worker::spawn(event_loop, waker)?;
        *self.registry.write() = registry;
        lifecycle.worker = Some(worker);

        info!(capacity, "Tunnel started");
        Ok(())
    }

    /// Stop the current run and wait for its thread
    ///
    /// Returns `Ok(None)` when no run is active. Only one stop proceeds at a
    /// time; concurrent callers wait for it.
    ///
    /// # Errors
    ///
    /// - [`TunnelError::Reactor`] if the run ended with a handler or wait error
    /// - [`TunnelError::Signal`] if the reactor could not be woken
    /// - [`TunnelError::WorkerPanicked`] if the reactor thread panicked
    pub fn stop(&self) -> Result<Option<RunStats>, TunnelError> {
        let mut lifecycle = self.lifecycle.lock();
        Self::stop_locked(&mut lifecycle)
    }

    fn stop_locked(lifecycle: &mut Lifecycle) -> Result<Option<RunStats>, TunnelError> {
        let Some(worker) = lifecycle.worker.take() else {
            info!("Tunnel not running");
            return Ok(None);
        };

        if let Err(e) = worker.signal() {
            warn!(error = %e, "Failed to signal reactor");
            lifecycle.worker = Some(worker);
            return Err(TunnelError::Signal(e));
        }

        debug!("Waiting for reactor thread");
        let stats = worker.join()?;
        info!(
            iterations = stats.iterations,
            evicted = stats.evicted,
            "Tunnel stopped"
        );
        Ok(Some(stats))
    }

    /// Stop if running and refuse any further start
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error of the final [`stop`](Self::stop), if any. The
    /// tunnel is torn down regardless.
    pub fn teardown(&self) -> Result<Option<RunStats>, TunnelError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.torn_down {
            return Ok(None);
        }
        let result = Self::stop_locked(&mut lifecycle);
        lifecycle.torn_down = true;
        info!("Tunnel torn down");
        result
    }

    /// Whether a reactor thread is alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .worker
            .as_ref()
            .is_some_and(Worker::is_alive)
    }

    /// Live sessions of the current run
    #[must_use]
    pub fn session_counts(&self) -> SessionCounts {
        self.registry.read().lock().live_counts()
    }

    /// Interface MTU
    #[must_use]
    pub const fn current_mtu(&self) -> usize {
        self.config.tunnel.mtu
    }

    /// HTTP rewriter sized for the interface MTU
    #[must_use]
    pub const fn rewriter(&self) -> HttpRewriter {
        HttpRewriter::for_mtu(self.config.tunnel.mtu)
    }

    fn apply_log_level(&self, level: &str) {
        match &self.log {
            Some(handle) => {
                if let Err(e) = handle.set_level(level) {
                    warn!(level, error = %e, "Failed to apply run log level");
                }
            }
            None => debug!(level, "No log handle, run log level ignored"),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Tunnel dropped with a failed run");
        }
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("mtu", &self.config.tunnel.mtu)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
