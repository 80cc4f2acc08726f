//! Readiness multiplexer
//!
//! Thin wrapper over Linux `epoll`. Registrations carry a 64-bit token; session
//! sockets use their [`SessionId`](crate::session::SessionId) token, and the
//! two tokens at the top of the range are reserved for the interface and the
//! cancellation waker.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Token of the cancellation waker
pub const WAKER_TOKEN: u64 = u64::MAX;

/// Token of the virtual interface
pub const INTERFACE_TOKEN: u64 = u64::MAX - 1;

/// Readiness a registration asks for
///
/// Errors and hang-ups are always reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };

    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    #[allow(clippy::cast_sign_loss)]
    const fn to_epoll(self) -> u32 {
        let mut events = libc::EPOLLERR as u32;
        if self.readable {
            events |= libc::EPOLLIN as u32;
        }
        if self.writable {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }
}

/// One ready descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    flags: u32,
}

#[allow(clippy::cast_sign_loss)]
impl Event {
    /// Registration token
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.flags & (libc::EPOLLIN as u32) != 0
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags & (libc::EPOLLOUT as u32) != 0
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.flags & (libc::EPOLLERR as u32) != 0
    }

    #[must_use]
    pub const fn is_hangup(&self) -> bool {
        self.flags & (libc::EPOLLHUP as u32) != 0
    }
}

/// Buffer receiving ready events
#[derive(Debug)]
pub struct Events {
    inner: Vec<libc::epoll_event>,
}

impl Events {
    /// Create a buffer for up to `capacity` events per wait
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Number of events from the last wait
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the last wait timed out
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over the events from the last wait
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter().map(|raw| Event {
            token: raw.u64,
            flags: raw.events,
        })
    }
}

/// Owned epoll instance
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
}

impl Poller {
    /// Create a new epoll instance
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_create1` fails.
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_create1 returned a fresh descriptor we now own
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.to_epoll(),
            u64: token,
        };
        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                op,
                fd,
                std::ptr::addr_of_mut!(event),
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Register a descriptor
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_ctl` fails.
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Change the interest of a registered descriptor
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_ctl` fails.
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Remove a descriptor
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_ctl` fails.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, Interest::READABLE)
    }

    /// Wait for readiness
    ///
    /// `None` blocks until an event arrives. Timeouts are rounded up to whole
    /// milliseconds so a sub-millisecond deadline does not turn into a busy
    /// poll. An interrupted wait is returned as `ErrorKind::Interrupted`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `epoll_wait` fails.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout.map_or(-1, timeout_millis);
        let capacity = i32::try_from(events.inner.capacity()).unwrap_or(i32::MAX);

        events.inner.clear();
        let ready = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.inner.as_mut_ptr(),
                capacity,
                timeout_ms,
            )
        };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }

        #[allow(clippy::cast_sign_loss)]
        let ready = ready as usize;
        // SAFETY: the kernel initialised the first `ready` entries
        unsafe { events.inner.set_len(ready) };
        Ok(ready)
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    let mut ms = timeout.as_millis();
    if Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX)) < timeout {
        ms += 1;
    }
    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
}

/// Zero-timeout readability check
///
/// Errors, including an interrupted poll, count as not readable.
#[must_use]
pub fn is_readable(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(std::ptr::addr_of_mut!(pfd), 1, 0) };
    ret > 0 && pfd.revents & libc::POLLIN != 0
}
