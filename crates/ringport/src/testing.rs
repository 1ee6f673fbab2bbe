//! Scripted completion queue for deterministic loop tests.
//!
//! Records every submission and hands back whatever completions the test
//! pushed, in order. Nothing touches the kernel: fds only need to be
//! numbers, and buffers are inspected through the recorded `BufDesc`s.

use std::collections::{HashSet, VecDeque};
use std::os::fd::RawFd;
use std::time::Duration;

use ringport_core::error::{Result, RingportError};
use ringport_core::queue::{require_associated, Completion, CompletionQueue, Dequeued, Submission};
use ringport_core::token::{OpKind, Token};

#[derive(Default)]
pub(crate) struct ScriptQueue {
    pub associated: HashSet<RawFd>,
    pub submitted: Vec<(Token, Submission)>,
    pub ready: VecDeque<Completion>,
    /// Returned from `submit()` once, then cleared.
    pub fail_next_submit: Option<RingportError>,
    dequeued: usize,
}

impl ScriptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&mut self, token: Token, result: i32) {
        self.ready.push_back(Completion::new(token, result));
    }

    /// Submissions of `kind`, oldest first.
    pub fn of_kind(&self, kind: OpKind) -> Vec<Submission> {
        self.submitted
            .iter()
            .filter(|(t, _)| t.kind() == Some(kind))
            .map(|(_, op)| *op)
            .collect()
    }

    pub fn last(&self) -> Option<(Token, Submission)> {
        self.submitted.last().copied()
    }
}

impl CompletionQueue for ScriptQueue {
    fn associate(&mut self, fd: RawFd) -> Result<()> {
        if !self.associated.insert(fd) {
            return Err(RingportError::AlreadyAssociated(fd));
        }
        Ok(())
    }

    fn release(&mut self, fd: RawFd) {
        self.associated.remove(&fd);
    }

    fn submit(&mut self, token: Token, op: Submission) -> Result<()> {
        if let Some(e) = self.fail_next_submit.take() {
            return Err(e);
        }
        if let Some(fd) = op.fd() {
            require_associated(self.associated.contains(&fd), fd)?;
        }
        self.submitted.push((token, op));
        Ok(())
    }

    fn dequeue(&mut self, timeout: Option<Duration>) -> Dequeued {
        match self.ready.pop_front() {
            Some(c) => {
                self.dequeued += 1;
                Dequeued::Completion(c)
            }
            None if timeout.is_some() => Dequeued::Timeout,
            // An untimed wait on an empty script would block forever.
            None => Dequeued::Failed(RingportError::QueueWait(libc::EDEADLK)),
        }
    }

    fn inflight(&self) -> usize {
        self.submitted.len().saturating_sub(self.dequeued)
    }
}
