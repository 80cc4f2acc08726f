//! Descriptor limits and session capacity

use std::io;

use tracing::{debug, info, warn};

use crate::config::ReactorConfig;

/// Soft descriptor limit assumed when the real one cannot be queried
pub const FALLBACK_NOFILE_LIMIT: u64 = 1024;

/// Soft and hard `RLIMIT_NOFILE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NofileLimit {
    pub soft: u64,
    pub hard: u64,
}

/// Query `RLIMIT_NOFILE`
///
/// # Errors
///
/// Returns the OS error if `getrlimit` fails.
pub fn nofile_limit() -> io::Result<NofileLimit> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, std::ptr::addr_of_mut!(rlim)) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::useless_conversion)]
    Ok(NofileLimit {
        soft: u64::from(rlim.rlim_cur),
        hard: u64::from(rlim.rlim_max),
    })
}

/// Raise the soft descriptor limit to the hard limit
///
/// Failures are logged and the current limit stays in effect.
pub fn raise_nofile_limit() -> Option<NofileLimit> {
    let current = match nofile_limit() {
        Ok(limit) => limit,
        Err(e) => {
            warn!(error = %e, "Failed to query descriptor limit");
            return None;
        }
    };

    if current.soft >= current.hard {
        debug!(soft = current.soft, hard = current.hard, "Descriptor limit already at maximum");
        return Some(current);
    }

    let rlim = libc::rlimit {
        rlim_cur: current.hard as libc::rlim_t,
        rlim_max: current.hard as libc::rlim_t,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, std::ptr::addr_of!(rlim)) };
    if ret != 0 {
        warn!(
            soft = current.soft,
            hard = current.hard,
            error = %io::Error::last_os_error(),
            "Failed to raise descriptor limit"
        );
        return Some(current);
    }

    info!(from = current.soft, to = current.hard, "Raised descriptor limit");
    Some(NofileLimit {
        soft: current.hard,
        hard: current.hard,
    })
}

/// Live-session capacity for a soft descriptor limit
///
/// A share of the soft limit, capped by `max_sessions`, never below one.
#[must_use]
pub fn capacity_for_limit(soft: u64, config: &ReactorConfig) -> usize {
    let share = u128::from(soft) * u128::from(config.session_limit_percent) / 100;
    let share = usize::try_from(share).unwrap_or(usize::MAX);
    share.min(config.max_sessions).max(1)
}

/// Live-session capacity from the current descriptor limit
pub fn session_capacity(config: &ReactorConfig) -> usize {
    let soft = match nofile_limit() {
        Ok(limit) => limit.soft,
        Err(e) => {
            debug!(error = %e, fallback = FALLBACK_NOFILE_LIMIT, "getrlimit failed");
            FALLBACK_NOFILE_LIMIT
        }
    };
    let capacity = capacity_for_limit(soft, config);
    debug!(soft, capacity, "Session capacity");
    capacity
}
