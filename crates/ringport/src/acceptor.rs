//! Acceptor: who posts Accept operations.
//!
//! The engine owns exactly one acceptor and calls `start()` once to arm
//! it and again after every Accept completion, so one accept is
//! outstanding at a time. The acceptor only submits; the accepted socket
//! comes back through the completion queue as an `Accept` completion.

use std::os::fd::RawFd;

use ringport_core::error::Result;
use ringport_core::queue::{CompletionQueue, Submission};
use ringport_core::token::{OpKind, Token};

pub trait Acceptor {
    /// Post the next Accept on `queue`.
    fn start(&mut self, queue: &mut dyn CompletionQueue) -> Result<()>;
}

impl<F> Acceptor for F
where
    F: FnMut(&mut dyn CompletionQueue) -> Result<()>,
{
    fn start(&mut self, queue: &mut dyn CompletionQueue) -> Result<()> {
        self(queue)
    }
}

/// Accepts on a listening socket already associated with the queue.
#[derive(Debug, Clone, Copy)]
pub struct SocketAcceptor {
    listen_fd: RawFd,
}

impl SocketAcceptor {
    pub fn new(listen_fd: RawFd) -> Self {
        Self { listen_fd }
    }

    pub fn listen_fd(&self) -> RawFd {
        self.listen_fd
    }
}

impl Acceptor for SocketAcceptor {
    fn start(&mut self, queue: &mut dyn CompletionQueue) -> Result<()> {
        queue.submit(
            Token::detached(OpKind::Accept),
            Submission::Accept { fd: self.listen_fd },
        )
    }
}
