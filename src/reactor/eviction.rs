//! Timeout and eviction engine
//!
//! Runs on the reactor thread only, with the registry locked. A sweep asks each
//! session's handler whether the session is finished, removes the ones that
//! are, and computes the nearest idle deadline among the live remainder so the
//! reactor knows how long it may sleep.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::context::{RunContext, SweepContext};
use crate::handler::Handlers;
use crate::session::{ProtocolState, SessionId, SessionRegistry, UdpPhase};

/// Slack added to every idle deadline
pub const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Sessions removed by this sweep
    pub evicted: usize,
    /// Nearest future idle deadline among the remaining live sessions
    pub next_deadline: Option<Instant>,
}

/// Evict finished sessions and find the next deadline
pub fn sweep(
    sessions: &mut SessionRegistry,
    handlers: &mut Handlers,
    cx: &SweepContext<'_>,
) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    for id in sessions.ids() {
        let Some(session) = sessions.get_mut(id) else {
            continue;
        };
        let handler = handlers.for_protocol(session.protocol());

        if handler.check(cx, session) {
            remove_session(sessions, handlers, id);
            outcome.evicted += 1;
            continue;
        }

        if !session.is_live() {
            continue;
        }

        let timeout = handler.timeout(session, cx.load);
        let deadline = session
            .last_activity()
            .checked_add(timeout)
            .and_then(|d| d.checked_add(DEADLINE_GRACE));
        if let Some(deadline) = deadline.filter(|d| *d > cx.now) {
            outcome.next_deadline = Some(
                outcome
                    .next_deadline
                    .map_or(deadline, |current| current.min(deadline)),
            );
        }
    }

    if outcome.evicted > 0 {
        debug!(
            evicted = outcome.evicted,
            remaining = sessions.len(),
            "Sweep evicted sessions"
        );
    }

    outcome
}

/// Wind down every live session at the end of a run
///
/// ICMP sessions are stopped, active UDP sessions move to `Finishing`, blocked
/// UDP sessions are removed and live TCP sessions are handed to the TCP
/// handler's `terminate`. Returns the number of sessions affected.
pub fn terminate_all(
    sessions: &mut SessionRegistry,
    handlers: &mut Handlers,
    run: &RunContext,
) -> usize {
    let mut terminated = 0;

    for id in sessions.ids() {
        let Some(session) = sessions.get_mut(id) else {
            continue;
        };

        let remove = match &mut session.state {
            ProtocolState::Icmp(icmp) if !icmp.stop => {
                icmp.stop = true;
                trace!(flow = %session.key(), "ICMP terminate");
                false
            }
            ProtocolState::Udp(udp) if udp.phase == UdpPhase::Active => {
                udp.phase = UdpPhase::Finishing;
                trace!(flow = %session.key(), "UDP terminate");
                false
            }
            ProtocolState::Udp(udp) if udp.phase == UdpPhase::Blocked => {
                trace!(flow = %session.key(), "UDP remove blocked session");
                true
            }
            ProtocolState::Tcp(tcp) if !tcp.phase.is_terminal() => {
                handlers.tcp.terminate(run, session);
                debug!(flow = %session.key(), "TCP terminate");
                false
            }
            _ => continue,
        };

        if remove {
            remove_session(sessions, handlers, id);
        }
        terminated += 1;
    }

    terminated
}

/// Remove every session, releasing handler state and closing sockets
pub fn clear(sessions: &mut SessionRegistry, handlers: &mut Handlers) -> usize {
    let ids = sessions.ids();
    let count = ids.len();
    for id in ids {
        remove_session(sessions, handlers, id);
    }
    count
}

/// Remove one session: deregister, release, drop
pub(crate) fn remove_session(
    sessions: &mut SessionRegistry,
    handlers: &mut Handlers,
    id: SessionId,
) -> bool {
    let Some(mut session) = sessions.remove(id) else {
        return false;
    };
    session.deregister();
    handlers.for_protocol(session.protocol()).release(&mut session);
    trace!(flow = %session.key(), "Session removed");
    true
}
