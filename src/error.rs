//! Error types for tun-proxy
//!
//! This module defines the error hierarchy for the tunnel packet core.
//! Errors are grouped by subsystem and carry a recoverability hint so callers
//! can tell transient conditions from ones that end a tunnel run.

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

use crate::session::FlowKey;

/// Top-level error type for tun-proxy
#[derive(Debug, Error)]
pub enum TunProxyError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reactor loop errors
    #[error("Reactor error: {0}")]
    Reactor(#[from] ReactorError),

    /// Worker thread lifecycle errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// HTTP rewrite errors
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    /// Session registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Protocol or inbound handler failures
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Host callback failures
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TunProxyError {
    /// Check if this error is recoverable (the operation can be retried)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::Logging(_)
            | Self::Registry(_)
            | Self::Handler(_)
            | Self::Host(_) => false,
            Self::Reactor(e) => e.is_recoverable(),
            Self::Tunnel(e) => e.is_recoverable(),
            Self::Rewrite(_) => true,
            Self::Io(e) => is_transient(e),
        }
    }
}

/// Whether an I/O error is a transient OS condition that is retried silently
#[must_use]
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Errors raised by the readiness reactor loop
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Creating or updating the readiness multiplexer failed
    #[error("Poller {op} failed for fd {fd}: {source}")]
    Poller {
        op: &'static str,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// Creating the multiplexer or cancellation channel failed
    #[error("Failed to create {what}: {source}")]
    Setup {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The blocking wait failed with a non-transient error
    #[error("Readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    /// A protocol or inbound handler reported an unrecoverable error
    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),
}

impl ReactorError {
    /// Create a poller operation error
    pub fn poller(op: &'static str, fd: RawFd, source: io::Error) -> Self {
        Self::Poller { op, fd, source }
    }

    /// Create a setup error
    pub fn setup(what: &'static str, source: io::Error) -> Self {
        Self::Setup { what, source }
    }

    /// Reactor errors end the run; only interrupted waits are retried and
    /// those never surface as errors.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Wait(e) => is_transient(e),
            Self::Handler(e) => e.is_recoverable(),
            Self::Poller { .. } | Self::Setup { .. } => false,
        }
    }
}

/// Errors reported by external protocol and inbound handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Socket event handling failed for a session
    #[error("Session {flow} failed: {reason}")]
    Session { flow: String, reason: String },

    /// Reading from or writing to the virtual interface failed
    #[error("Interface I/O failed: {0}")]
    Interface(#[source] io::Error),

    /// A host callback failed in a load-bearing way
    #[error("Host callback failed: {0}")]
    Host(#[from] HostError),

    /// Other I/O error
    #[error("Handler I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    /// Create a session error
    pub fn session(flow: &FlowKey, reason: impl Into<String>) -> Self {
        Self::Session {
            flow: flow.to_string(),
            reason: reason.into(),
        }
    }

    /// Handler errors abort the dispatch batch and end the run
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Errors returned by host platform callbacks
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The host refused to exempt a socket from VPN routing
    #[error("Failed to protect socket {fd}")]
    ProtectFailed { fd: RawFd },

    /// A callback could not be completed
    #[error("Host callback {callback} failed: {reason}")]
    Callback {
        callback: &'static str,
        reason: String,
    },
}

impl HostError {
    /// Create a callback error
    pub fn callback(callback: &'static str, reason: impl Into<String>) -> Self {
        Self::Callback {
            callback,
            reason: reason.into(),
        }
    }
}

/// Session registry errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A session with the same identity tuple already exists
    #[error("Session already exists for {0}")]
    Duplicate(FlowKey),

    /// Every slot handle is in use
    #[error("Session registry exhausted")]
    Exhausted,
}

/// HTTP rewrite errors
///
/// Malformed requests are not errors: they produce "no rewrite". Only an
/// output that would not fit the configured maximum is reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RewriteError {
    /// The rewritten request would exceed the scratch capacity
    #[error("Rewritten request needs {needed} bytes, maximum is {max}")]
    CapacityExceeded { needed: usize, max: usize },
}

/// Worker thread lifecycle errors
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A run is already active on the worker thread
    #[error("Tunnel worker is already running")]
    AlreadyRunning,

    /// The tunnel was torn down and can no longer start
    #[error("Tunnel has been torn down")]
    TornDown,

    /// Spawning the worker thread failed
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The worker thread panicked
    #[error("Tunnel worker panicked")]
    WorkerPanicked,

    /// The reactor loop ended with an error
    #[error("Tunnel run failed: {0}")]
    Reactor(#[from] ReactorError),

    /// Signalling the worker to stop failed
    #[error("Failed to signal worker: {0}")]
    Signal(#[source] io::Error),
}

impl TunnelError {
    /// Check if the caller can retry the lifecycle operation
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AlreadyRunning | Self::Reactor(_) => true,
            Self::TornDown | Self::WorkerPanicked => false,
            Self::Spawn(e) | Self::Signal(e) => is_transient(e),
        }
    }
}

/// Logging initialisation errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log filter directive could not be parsed
    #[error("Invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    /// A global subscriber is already installed
    #[error("Failed to install subscriber: {0}")]
    Install(String),

    /// The filter could not be swapped at runtime
    #[error("Failed to reload log filter: {0}")]
    Reload(String),
}

/// Result type alias using `TunProxyError`
pub type Result<T> = std::result::Result<T, TunProxyError>;
