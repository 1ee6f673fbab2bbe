//! `UringQueue`: default `CompletionQueue` implementation.
//!
//! Wraps the `io-uring` crate. Submissions only push SQEs; the next
//! `dequeue()` flushes them and waits in the same `io_uring_enter()` call.
//! Every CQE drained by that call is buffered locally so `dequeue()` can
//! hand them out one at a time without re-entering the kernel.
//!
//! No SQPOLL, no fixed files, no fixed buffers. Works on any kernel with
//! io_uring and `IORING_FEAT_EXT_ARG` (5.11+) for timed waits.

use ringport_core::error::{Result, RingportError};
use ringport_core::queue::{require_associated, Completion, CompletionQueue, Dequeued, Submission};
use ringport_core::token::Token;
use ringport_core::rp_trace;

use io_uring::{opcode, squeue, types, IoUring};
use nix::errno::Errno;

use std::collections::{HashSet, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::errno_code;

/// Configuration for UringQueue.
#[derive(Debug, Clone)]
pub struct UringQueueConfig {
    /// Number of SQ entries. Rounded up to a power of 2 by the kernel.
    pub sq_entries: u32,
    /// Number of CQ entries. Defaults to 2 * sq_entries.
    pub cq_entries: Option<u32>,
}

impl Default for UringQueueConfig {
    fn default() -> Self {
        Self {
            sq_entries: 256,
            cq_entries: None,
        }
    }
}

pub struct UringQueue {
    ring: IoUring,
    associated: HashSet<RawFd>,
    ready: VecDeque<Completion>,
    inflight: usize,
    unflushed: usize,
}

impl UringQueue {
    pub fn new(config: UringQueueConfig) -> Result<Self> {
        let mut builder = IoUring::builder();
        if let Some(cq) = config.cq_entries {
            builder.setup_cqsize(cq);
        }
        let ring = builder
            .build(config.sq_entries)
            .map_err(|e| RingportError::QueueSetup(e.raw_os_error().unwrap_or(-1)))?;

        Ok(Self {
            ring,
            associated: HashSet::new(),
            ready: VecDeque::with_capacity(config.sq_entries as usize),
            inflight: 0,
            unflushed: 0,
        })
    }

    /// The io_uring fd.
    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    /// SQ capacity.
    pub fn capacity(&self) -> usize {
        self.ring.params().sq_entries() as usize
    }

    /// Kick queued SQEs to the kernel without waiting.
    pub fn flush(&mut self) -> Result<usize> {
        if self.unflushed == 0 {
            return Ok(0);
        }
        let submitted = self
            .ring
            .submit()
            .map_err(|e| RingportError::QueueSubmit(e.raw_os_error().unwrap_or(-1)))?;
        self.unflushed = 0;
        Ok(submitted)
    }

    fn push(&mut self, sqe: &squeue::Entry) -> Result<()> {
        // Safety: every pointer inside the SQE comes from a BufDesc whose
        // memory the engine keeps alive until the completion is dequeued.
        let pushed = unsafe { self.ring.submission().push(sqe).is_ok() };
        if !pushed {
            self.flush()?;
            unsafe {
                self.ring
                    .submission()
                    .push(sqe)
                    .map_err(|_| RingportError::QueueFull)?;
            }
        }
        self.unflushed += 1;
        self.inflight += 1;
        Ok(())
    }

    fn drain(&mut self) -> usize {
        let mut n = 0;
        for cqe in self.ring.completion() {
            self.ready
                .push_back(Completion::new(Token(cqe.user_data()), cqe.result()));
            n += 1;
        }
        self.inflight = self.inflight.saturating_sub(n);
        n
    }

    /// Flush and block until at least one CQE is posted or `timeout` passes.
    fn wait(&mut self, timeout: Option<Duration>) -> std::io::Result<usize> {
        match timeout {
            None => self.ring.submit_and_wait(1),
            Some(t) => {
                let ts = types::Timespec::from(t);
                let args = types::SubmitArgs::new().timespec(&ts);
                self.ring.submitter().submit_with_args(1, &args)
            }
        }
    }
}

/// Translate one ringport submission into an SQE.
fn build_sqe(token: Token, op: Submission) -> squeue::Entry {
    let sqe = match op {
        Submission::Accept { fd } => {
            opcode::Accept::new(types::Fd(fd), ptr::null_mut(), ptr::null_mut())
                .flags(libc::SOCK_CLOEXEC)
                .build()
        }
        Submission::Connect { fd, addr } => opcode::Connect::new(
            types::Fd(fd),
            addr.ptr as *const libc::sockaddr,
            addr.len as libc::socklen_t,
        )
        .build(),
        Submission::Recv { fd, buf } => {
            opcode::Recv::new(types::Fd(fd), buf.ptr, buf.len).build()
        }
        // MSG_NOSIGNAL: a peer reset must surface as -EPIPE, not SIGPIPE.
        Submission::Send { fd, buf } => {
            opcode::Send::new(types::Fd(fd), buf.ptr as *const u8, buf.len)
                .flags(libc::MSG_NOSIGNAL)
                .build()
        }
        Submission::Read { fd, buf } => {
            opcode::Read::new(types::Fd(fd), buf.ptr, buf.len)
                .offset(u64::MAX)
                .build()
        }
        Submission::Cancel { target } => opcode::AsyncCancel::new(target.0).build(),
    };
    sqe.user_data(token.0)
}

impl CompletionQueue for UringQueue {
    fn associate(&mut self, fd: RawFd) -> Result<()> {
        // io_uring needs no per-fd registration; validate the fd and track
        // it so submissions on foreign fds are caught.
        Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFD) })
            .map_err(|e| RingportError::Os(errno_code(e)))?;
        if !self.associated.insert(fd) {
            return Err(RingportError::AlreadyAssociated(fd));
        }
        Ok(())
    }

    fn release(&mut self, fd: RawFd) {
        self.associated.remove(&fd);
    }

    fn submit(&mut self, token: Token, op: Submission) -> Result<()> {
        if let Some(fd) = op.fd() {
            require_associated(self.associated.contains(&fd), fd)?;
        }
        rp_trace!("submit {:?} {:?}", token, op);
        self.push(&build_sqe(token, op))
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> Dequeued {
        loop {
            if let Some(c) = self.ready.pop_front() {
                return Dequeued::Completion(c);
            }

            match self.wait(timeout) {
                Ok(_) => {}
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    // ETIME: timed out. EBUSY: CQ overflowed, drain it.
                    Some(libc::ETIME) | Some(libc::EBUSY) => {}
                    code => {
                        return Dequeued::Failed(RingportError::QueueWait(code.unwrap_or(-1)))
                    }
                },
            }
            self.unflushed = 0;

            if self.drain() == 0 && timeout.is_some() {
                return Dequeued::Timeout;
            }
        }
    }

    fn inflight(&self) -> usize {
        self.inflight
    }
}

impl Drop for UringQueue {
    fn drop(&mut self) {
        // Hand back what the kernel already finished; the ring's own Drop
        // closes the fd and unmaps SQ/CQ.
        let _ = self.flush();
        self.drain();
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringport_core::queue::BufDesc;
    use ringport_core::token::{ConnId, OpKind};
    use std::os::unix::net::UnixStream;

    fn queue() -> Option<UringQueue> {
        match UringQueue::new(UringQueueConfig::default()) {
            Ok(q) => Some(q),
            Err(e) => {
                eprintln!("io_uring unavailable, skipping: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_associate_once() {
        let Some(mut q) = queue() else { return };
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(q.associate(a.as_raw_fd()).is_ok());
        assert_eq!(
            q.associate(a.as_raw_fd()),
            Err(RingportError::AlreadyAssociated(a.as_raw_fd()))
        );
        q.release(a.as_raw_fd());
        assert!(q.associate(a.as_raw_fd()).is_ok());
    }

    #[test]
    fn test_associate_rejects_bad_fd() {
        let Some(mut q) = queue() else { return };
        assert!(matches!(q.associate(-1), Err(RingportError::Os(_))));
    }

    #[test]
    fn test_submit_requires_association() {
        let Some(mut q) = queue() else { return };
        let (a, _b) = UnixStream::pair().unwrap();
        let mut buf = [0u8; 8];
        let op = Submission::Recv { fd: a.as_raw_fd(), buf: BufDesc::from_mut(&mut buf) };
        let token = Token::new(OpKind::Read, ConnId::new(0, 0));
        assert_eq!(
            q.submit(token, op),
            Err(RingportError::NotAssociated(a.as_raw_fd()))
        );
        assert_eq!(q.inflight(), 0);
    }

    #[test]
    fn test_send_then_recv_round_trip() {
        use std::io::{Read, Write};

        let Some(mut q) = queue() else { return };
        let (a, mut b) = UnixStream::pair().unwrap();
        q.associate(a.as_raw_fd()).unwrap();

        let payload = *b"ping";
        let send = Token::new(OpKind::Write, ConnId::new(1, 0));
        q.submit(send, Submission::Send { fd: a.as_raw_fd(), buf: BufDesc::from_ref(&payload) })
            .unwrap();
        assert_eq!(q.inflight(), 1);

        match q.dequeue(Some(Duration::from_secs(5))) {
            Dequeued::Completion(c) => {
                assert_eq!(c.token, send);
                assert_eq!(c.result, 4);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut got = [0u8; 4];
        b.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        let mut buf = [0u8; 16];
        let recv = Token::new(OpKind::Read, ConnId::new(1, 0));
        q.submit(recv, Submission::Recv { fd: a.as_raw_fd(), buf: BufDesc::from_mut(&mut buf) })
            .unwrap();
        b.write_all(b"pong!").unwrap();
        match q.dequeue(Some(Duration::from_secs(5))) {
            Dequeued::Completion(c) => {
                assert_eq!(c.token, recv);
                assert_eq!(c.result, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(&buf[..5], b"pong!");
        assert_eq!(q.inflight(), 0);
    }

    #[test]
    fn test_dequeue_times_out() {
        let Some(mut q) = queue() else { return };
        assert!(matches!(
            q.dequeue(Some(Duration::from_millis(20))),
            Dequeued::Timeout
        ));
    }
}
