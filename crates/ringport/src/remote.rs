//! `Remote`: run closures on the loop thread from any thread.
//!
//! Connection state is only ever touched by the thread driving the
//! `Context`. Other threads marshal work onto it: `post()` pushes a boxed
//! closure onto a lock-free MPSC queue and bumps an eventfd. The loop keeps
//! one read on that eventfd armed (`OpKind::Wake`); when it completes the
//! loop pops and runs every queued closure with its `Io`, then re-arms.
//!
//! ```rust,ignore
//! let remote = ctx.remote()?;
//! std::thread::spawn(move || {
//!     remote.post(|io| rp_info!("{}", io.stats())).ok();
//! });
//! ctx.run();
//! ```

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use ringport_core::error::{Result, RingportError};
use ringport_core::queue::CompletionQueue;
use ringport_module::EventFd;

use crate::io::Io;

pub type Job<Q> = Box<dyn FnOnce(&mut Io<Q>) + Send>;

struct Shared<Q: CompletionQueue> {
    /// MPSC queue: any thread pushes, the loop pops.
    jobs: ArrayQueue<Job<Q>>,
    waker: EventFd,
}

/// Cloneable, `Send + Sync` handle for posting work to one `Context`.
pub struct Remote<Q: CompletionQueue> {
    shared: Arc<Shared<Q>>,
}

impl<Q: CompletionQueue> Clone for Remote<Q> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<Q: CompletionQueue> Remote<Q> {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                jobs: ArrayQueue::new(capacity),
                waker: EventFd::create()?,
            }),
        })
    }

    /// Queue `job` to run on the loop thread. `RemoteFull` when the loop
    /// has fallen `remote_capacity` jobs behind.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut Io<Q>) + Send + 'static,
    {
        self.shared
            .jobs
            .push(Box::new(job))
            .map_err(|_| RingportError::RemoteFull)?;
        self.shared.waker.notify()
    }

    /// Jobs posted but not yet run.
    pub fn pending(&self) -> usize {
        self.shared.jobs.len()
    }

    pub(crate) fn waker_fd(&self) -> std::os::fd::RawFd {
        self.shared.waker.fd()
    }

    /// Run every queued job. Jobs posted while draining run in this pass
    /// too; the eventfd read they triggered comes back as a spare wake-up.
    pub(crate) fn run_jobs(&self, io: &mut Io<Q>) -> usize {
        let mut n = 0;
        while let Some(job) = self.shared.jobs.pop() {
            job(io);
            n += 1;
        }
        n
    }
}
