//! Host platform callbacks

use std::os::fd::RawFd;

use crate::error::HostError;
use crate::session::FlowKey;

/// Platforms below this version need sockets explicitly protected from the
/// tunnel's own routing
pub const PROTECT_BELOW_VERSION: u32 = 21;

/// Synchronous callbacks into the host platform
///
/// The bridge is shared read-only between the lifecycle thread and the
/// reactor thread.
pub trait HostBridge: Send + Sync {
    /// Exempt a socket from being routed back into the tunnel
    fn protect(&self, fd: RawFd) -> Result<(), HostError>;

    /// Application uid owning a flow, if known
    fn uid_for(&self, flow: &FlowKey) -> Result<Option<u32>, HostError>;

    /// Read a system property
    fn property(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Host platform version
    fn platform_version(&self) -> u32;
}

/// Bridge for hosts that need no callbacks
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHostBridge;

impl HostBridge for NoopHostBridge {
    fn protect(&self, _fd: RawFd) -> Result<(), HostError> {
        Ok(())
    }

    fn uid_for(&self, _flow: &FlowKey) -> Result<Option<u32>, HostError> {
        Ok(None)
    }

    fn property(&self, _name: &str) -> Result<Option<String>, HostError> {
        Ok(None)
    }

    fn platform_version(&self) -> u32 {
        u32::MAX
    }
}
