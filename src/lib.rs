//! tun-proxy: packet core for a device-local interception tunnel
//!
//! Every IP packet a device sends arrives on a virtual interface descriptor.
//! This crate multiplexes those packets onto per-flow sessions, each backed by
//! a host socket, and drives all of them from a single epoll reactor thread.
//!
//! # Features
//!
//! - **Session registry**: ICMP, UDP and TCP flows keyed by protocol and
//!   endpoints, with generation-checked handles
//! - **Reactor**: one thread multiplexing the interface, every session socket
//!   and a cancellation waker
//! - **Eviction**: idle sessions are swept on a deadline that shortens as the
//!   registry fills
//! - **Lifecycle**: start, stop and teardown with an orderly termination sweep
//! - **HTTP rewriting**: origin-form request lines are rewritten to
//!   absolute-form so a request can be forwarded through an HTTP proxy
//!
//! ```
//! use tun_proxy::HttpRewriter;
//!
//! let request = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
//! let rewritten = HttpRewriter::for_mtu(1500).rewrite(request)?.expect("has a Host header");
//! assert!(rewritten.starts_with(b"GET http://example.com/index.html HTTP/1.1\r\n"));
//! # Ok::<(), tun_proxy::error::RewriteError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! interface fd ──► EventLoop ──► InboundHandler ──► SessionRegistry
//!                     │                                   │
//!   session sockets ──┴──► ProtocolHandler (ICMP/UDP/TCP) ┘
//!                     │
//!   Waker (stop) ─────┘
//! ```
//!
//! Protocol parsing and socket forwarding live behind the [`handler`] traits;
//! this crate owns the scheduling, bookkeeping and teardown around them.
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`context`]: Per-run context handed to handlers
//! - [`error`]: Error types
//! - [`handler`]: Protocol handler and host bridge contracts
//! - [`http`]: HTTP header scanning and request rewriting
//! - [`logging`]: Tracing subscriber setup
//! - [`reactor`]: Event loop, poller and eviction
//! - [`session`]: Session model and registry
//! - [`tunnel`]: Reactor thread lifecycle

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod logging;
pub mod reactor;
pub mod session;
pub mod tunnel;

// Re-export commonly used types at the crate root
pub use config::{Config, LogConfig, ProxyConfig, ReactorConfig, Socks5Config, TunnelConfig};
pub use context::{InterfaceContext, Load, RunContext, SweepContext};
pub use error::{
    ConfigError, HandlerError, HostError, ReactorError, Result, RewriteError, TunProxyError,
    TunnelError,
};
pub use handler::{Handlers, HostBridge, InboundHandler, PacketCapture, ProtocolHandler, Readiness};
pub use http::HttpRewriter;
pub use logging::{init_logging, LogHandle};
pub use reactor::{EventLoop, RunStats};
pub use session::{FlowKey, Protocol, Session, SessionCounts, SessionId, SessionRegistry};
pub use tunnel::{RunConfig, Tunnel};
