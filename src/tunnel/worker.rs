//! Reactor worker thread

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ReactorError, TunnelError};
use crate::reactor::{EventLoop, RunStats, Waker};

/// Name of the reactor thread
pub const WORKER_THREAD_NAME: &str = "tun-reactor";

/// A spawned reactor thread and its cancellation channel
#[derive(Debug)]
pub(crate) struct Worker {
    handle: JoinHandle<Result<RunStats, ReactorError>>,
    waker: Arc<Waker>,
    started_at: Instant,
}

impl Worker {
    /// Spawn the reactor on a named thread
    pub(crate) fn spawn(event_loop: EventLoop, waker: Arc<Waker>) -> Result<Self, TunnelError> {
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || event_loop.run())
            .map_err(TunnelError::Spawn)?;

        debug!(thread = WORKER_THREAD_NAME, "Reactor thread spawned");

        Ok(Self {
            handle,
            waker,
            started_at: Instant::now(),
        })
    }

    /// Whether the reactor thread is still running
    pub(crate) fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Time since the thread was spawned
    pub(crate) fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Ask the reactor to stop at its next wake point
    pub(crate) fn signal(&self) -> io::Result<()> {
        self.waker.wake()
    }

    /// Wait for the reactor thread to exit
    pub(crate) fn join(self) -> Result<RunStats, TunnelError> {
        match self.handle.join() {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(TunnelError::Reactor(e)),
            Err(_) => Err(TunnelError::WorkerPanicked),
        }
    }
}
