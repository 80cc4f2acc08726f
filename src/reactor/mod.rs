//! Readiness reactor
//!
//! The reactor multiplexes the virtual interface, every session socket and a
//! cancellation waker over one `epoll` instance and dispatches ready
//! descriptors to the protocol handlers.
//!
//! # Module layout
//!
//! - [`poller`]: `epoll` wrapper, tokens and interest sets
//! - [`waker`]: `eventfd` cancellation channel
//! - [`limits`]: descriptor limit and session capacity
//! - [`eviction`]: sweeps that evict finished sessions and find deadlines
//! - [`event_loop`]: the loop itself
//!
//! # Threading
//!
//! A reactor runs on exactly one thread. The session registry is shared with
//! the lifecycle side through a mutex that is held while a batch is
//! dispatched and released during the blocking wait. Cancellation is only
//! observed at wake points.

pub mod event_loop;
pub mod eviction;
pub mod limits;
pub mod poller;
pub mod waker;

pub use event_loop::{EventLoop, RunStats};
pub use eviction::{clear, sweep, terminate_all, SweepOutcome, DEADLINE_GRACE};
pub use limits::{raise_nofile_limit, session_capacity, NofileLimit};
pub use poller::{is_readable, Event, Events, Interest, Poller, INTERFACE_TOKEN, WAKER_TOKEN};
pub use waker::Waker;
