//! Cancellation channel
//!
//! An `eventfd` registered in the same wait set as the interface and the
//! session sockets. Any thread may [`wake`](Waker::wake) it; the reactor only
//! notices at its next wake point.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Wake-capable descriptor merged into the reactor's wait set
#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    /// Create a non-blocking eventfd
    ///
    /// # Errors
    ///
    /// Returns the OS error if `eventfd` fails.
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd returned a fresh descriptor we now own
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Signal the waker
    ///
    /// Signalling an already signalled waker is not an error.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the counter cannot be written.
    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                std::ptr::addr_of!(one).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake-up is already pending
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the waker, returning whether it was signalled
    ///
    /// # Errors
    ///
    /// Returns the OS error if the counter cannot be read.
    pub fn drain(&self) -> io::Result<bool> {
        let mut count: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                std::ptr::addr_of_mut!(count).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(count > 0)
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
