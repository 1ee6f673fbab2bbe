//! Completion queue abstraction.
//!
//! A `CompletionQueue` accepts operation submissions and hands back their
//! completions one at a time. It is the only place the engine blocks.
//!
//! # Implementors
//!
//! - `UringQueue` (ringport-module, default): io_uring. Submissions are
//!   queued SQEs, flushed by the next `dequeue()` in the same
//!   `io_uring_enter()` call that waits for completions.
//!
//! - `ScriptQueue` (ringport, tests only): records submissions and
//!   replays completions pushed by the test.
//!
//! **Contract:**
//! - `associate()` exactly once per socket, before its first submission.
//! - `submit()` never blocks. Success means "queued, completes later";
//!   there is no inline-completion case the caller has to handle.
//! - Every submitted token comes back from `dequeue()` at most once.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, RingportError};
use crate::token::Token;

/// Raw buffer descriptor handed to the OS for one operation.
///
/// The engine guarantees the memory stays valid (and is not touched
/// by anything else) until the operation's completion is dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufDesc {
    pub ptr: *mut u8,
    pub len: u32,
}

impl BufDesc {
    /// Describe a mutable region the kernel will write into.
    #[inline]
    pub fn from_mut(buf: &mut [u8]) -> Self {
        Self { ptr: buf.as_mut_ptr(), len: clamp_len(buf.len()) }
    }

    /// Describe a region the kernel will only read from.
    #[inline]
    pub fn from_ref(buf: &[u8]) -> Self {
        Self { ptr: buf.as_ptr() as *mut u8, len: clamp_len(buf.len()) }
    }
}

#[inline]
fn clamp_len(len: usize) -> u32 {
    len.min(u32::MAX as usize) as u32
}

// Safety: a BufDesc is a pointer + length; ownership of the memory stays
// with the engine.
unsafe impl Send for BufDesc {}

/// One operation to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// accept4(fd, NULL, NULL, SOCK_CLOEXEC). Result: new fd.
    Accept { fd: RawFd },
    /// connect(fd, addr, addr_len). `addr` points at a `sockaddr`.
    Connect { fd: RawFd, addr: BufDesc },
    /// recv(fd, buf, len, 0). Result: bytes received, 0 on orderly close.
    Recv { fd: RawFd, buf: BufDesc },
    /// send(fd, buf, len, MSG_NOSIGNAL). Result: bytes sent.
    Send { fd: RawFd, buf: BufDesc },
    /// read(fd, buf, len) on a non-socket fd (eventfd).
    Read { fd: RawFd, buf: BufDesc },
    /// Best-effort cancellation of the operation stamped with `target`.
    Cancel { target: Token },
}

impl Submission {
    /// The fd this submission operates on, if any.
    #[inline]
    pub fn fd(&self) -> Option<RawFd> {
        match *self {
            Submission::Accept { fd }
            | Submission::Connect { fd, .. }
            | Submission::Recv { fd, .. }
            | Submission::Send { fd, .. }
            | Submission::Read { fd, .. } => Some(fd),
            Submission::Cancel { .. } => None,
        }
    }
}

/// A finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Token given at submission.
    pub token: Token,
    /// Bytes transferred / new fd on success, negative errno on failure.
    pub result: i32,
}

impl Completion {
    #[inline]
    pub const fn new(token: Token, result: i32) -> Self {
        Self { token, result }
    }
}

/// Outcome of one blocking `dequeue()`.
#[derive(Debug)]
pub enum Dequeued {
    /// One operation finished.
    Completion(Completion),
    /// The timeout elapsed with nothing ready.
    Timeout,
    /// The queue itself failed; the event loop must stop.
    Failed(RingportError),
}

/// OS-backed completion multiplexer.
pub trait CompletionQueue {
    /// Bind `fd` to this queue. Must happen once per socket before its
    /// first submission.
    fn associate(&mut self, fd: RawFd) -> Result<()>;

    /// Forget `fd`. Called when the engine destroys the owning connection.
    fn release(&mut self, fd: RawFd);

    /// Queue one operation stamped with `token`.
    fn submit(&mut self, token: Token, op: Submission) -> Result<()>;

    /// Block until one completion is ready or `timeout` elapses.
    /// `None` waits forever.
    fn dequeue(&mut self, timeout: Option<Duration>) -> Dequeued;

    /// Operations submitted but not yet dequeued.
    fn inflight(&self) -> usize;
}

/// Convenience for implementors: reject submissions on unknown fds.
#[inline]
pub fn require_associated(associated: bool, fd: RawFd) -> Result<()> {
    if associated {
        Ok(())
    } else {
        Err(RingportError::NotAssociated(fd))
    }
}
