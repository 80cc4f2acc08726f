//! Contracts for the collaborators the core drives
//!
//! The core does not parse packets or speak any transport protocol itself.
//! Packet handling is delegated to one [`ProtocolHandler`] per protocol and an
//! [`InboundHandler`] that reads the virtual interface; host platform services
//! are reached through a [`HostBridge`]; captured packets go to an optional
//! [`PacketCapture`] sink.
//!
//! # Dispatch
//!
//! ```text
//! interface readable ──► InboundHandler::on_interface_data (may create sessions)
//! socket readable    ──► Handlers::for_protocol(tag).on_socket_event
//! sweep              ──► check / timeout / release
//! shutdown           ──► terminate / release
//! ```

mod capture;
mod host;
mod traits;

pub use capture::PacketCapture;
pub use host::{HostBridge, NoopHostBridge, PROTECT_BELOW_VERSION};
pub use traits::{Handlers, InboundHandler, ProtocolHandler, Readiness};
