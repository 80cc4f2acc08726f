//! Session model and registry
//!
//! A session is the in-memory record of one network flow passing through the
//! virtual interface. Sessions are keyed by their identity tuple
//! ([`FlowKey`]) and owned by a [`SessionRegistry`], which hands out
//! generation-tagged [`SessionId`] handles that double as readiness tokens.
//!
//! # Liveness
//!
//! Every session carries protocol-specific sub-state. Whether a session counts
//! towards the live-session ceiling is decided per protocol:
//!
//! | Protocol | Live when |
//! |----------|-----------|
//! | ICMP | not stopped |
//! | UDP | phase is `Active` |
//! | TCP | phase is not `Closing` or `Close` |

mod registry;
mod types;

pub use registry::{SessionCounts, SessionId, SessionRegistry};
pub use types::{
    FlowKey, IcmpState, IpVersion, Protocol, ProtocolState, Session, TcpPhase, TcpState,
    UdpPhase, UdpState,
};
