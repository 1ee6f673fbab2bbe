//! `EventFd`: cross-thread wake-up for a blocked event loop.
//!
//! The loop keeps one 8-byte read on the eventfd queued on its ring.
//! `notify()` from any thread bumps the counter, the read completes, and
//! the loop wakes out of `dequeue()`. Multiple notifies before the loop
//! runs coalesce into one completion (eventfd counter semantics).
//!
//! The fd is created blocking: io_uring parks the read internally
//! instead of completing it with -EAGAIN.

use ringport_core::error::{Result, RingportError};

use nix::errno::Errno;

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::errno_code;

#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn create() -> Result<Self> {
        let fd = Errno::result(unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) })
            .map_err(|e| RingportError::Os(errno_code(e)))?;
        // Safety: fresh fd from eventfd().
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Bump the counter. Never blocks in practice: a blocking eventfd write
    /// only waits when the counter is about to overflow.
    pub fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        Errno::result(unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        })
        .map(drop)
        .map_err(|e| RingportError::Os(errno_code(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifies_coalesce() {
        let efd = EventFd::create().unwrap();
        efd.notify().unwrap();
        efd.notify().unwrap();

        let mut val: u64 = 0;
        let n = unsafe {
            libc::read(efd.fd(), &mut val as *mut u64 as *mut libc::c_void, 8)
        };
        assert_eq!(n, 8);
        assert_eq!(val, 2);
    }
}
