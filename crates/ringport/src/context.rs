//! `Context`: the event loop.
//!
//! One `Context` is driven by one thread. `run()` blocks in the completion
//! queue, classifies each completion (`dispatch::classify`) and acts on it:
//!
//! ```text
//!   dequeue ─▶ classify ─┬─ Ignored ───────────▶ (nothing)
//!                        ├─ Accepted ──────────▶ adopt fd, re-arm acceptor, on_connected
//!                        ├─ Connected ─────────▶ on_connected (or drop on error)
//!                        ├─ Closed ────────────▶ on_disconnected, destroy
//!                        ├─ Received ──────────▶ on_read (buffer lent out)
//!                        ├─ Sent ──────────────▶ continue partial send, or on_write
//!                        └─ Woken ─────────────▶ run Remote jobs, re-arm wake read
//! ```
//!
//! Completions for connections that are gone or draining never reach a
//! callback.

use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use ringport_core::error::{Result, RingportError};
use ringport_core::queue::{BufDesc, Completion, CompletionQueue, Dequeued, Submission};
use ringport_core::token::{ConnId, OpKind, Token};
use ringport_core::{rp_error, rp_info, rp_trace, rp_warn};
use ringport_module::{Socket, UringQueue, UringQueueConfig};

use crate::acceptor::{Acceptor, SocketAcceptor};
use crate::config::ContextConfig;
use crate::dispatch::{classify, Event};
use crate::handlers::Handlers;
use crate::io::Io;
use crate::remote::Remote;

/// The loop's end of a `Remote`: the handle plus the buffer its eventfd
/// read lands in.
struct Waker<Q: CompletionQueue> {
    remote: Remote<Q>,
    buf: Box<[u8; 8]>,
}

impl<Q: CompletionQueue> Waker<Q> {
    fn arm(&mut self, io: &mut Io<Q>) -> Result<()> {
        let op = Submission::Read {
            fd: self.remote.waker_fd(),
            buf: BufDesc::from_mut(&mut self.buf[..]),
        };
        io.queue_mut().submit(Token::detached(OpKind::Wake), op)
    }
}

pub struct Context<Q: CompletionQueue = UringQueue> {
    io: Io<Q>,
    handlers: Handlers<Q>,
    acceptor: Option<Box<dyn Acceptor>>,
    waker: Option<Waker<Q>>,
    listener: Option<Socket>,
}

impl Context<UringQueue> {
    /// io_uring queue plus a listening socket on `address:port`, with
    /// configuration from the environment.
    pub fn init(address: &str, port: u16) -> Result<Self> {
        Self::init_with(address, port, ContextConfig::from_env())
    }

    pub fn init_with(address: &str, port: u16, config: ContextConfig) -> Result<Self> {
        let mut ctx = Self::client(config)?;
        let socket = Socket::init(address, port, ctx.io.config().backlog)?;
        ctx.io.queue_mut().associate(socket.native())?;
        rp_info!("listening on {}", socket.local_addr());
        ctx.listener = Some(socket);
        Ok(ctx)
    }

    /// io_uring queue without a listener, for outbound connections only.
    pub fn client(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let queue = UringQueue::new(UringQueueConfig {
            sq_entries: config.sq_entries,
            cq_entries: None,
        })?;
        Ok(Self::with_queue(queue, config))
    }
}

impl<Q: CompletionQueue> Context<Q> {
    /// Context over any completion queue. No listener, no acceptor.
    pub fn with_queue(queue: Q, config: ContextConfig) -> Self {
        Self {
            io: Io::new(queue, config),
            handlers: Handlers::new(),
            acceptor: None,
            waker: None,
            listener: None,
        }
    }

    pub fn io(&mut self) -> &mut Io<Q> {
        &mut self.io
    }

    pub fn set_handlers(&mut self, handlers: Handlers<Q>) {
        self.handlers = handlers;
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Socket::local_addr)
    }

    pub fn listener_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(Socket::native)
    }

    /// Install the acceptor. It is armed by `start_acceptor()` and re-armed
    /// after every Accept completion.
    pub fn set_acceptor(&mut self, acceptor: impl Acceptor + 'static) {
        self.acceptor = Some(Box::new(acceptor));
    }

    pub fn start_acceptor(&mut self) -> Result<()> {
        match self.acceptor.as_mut() {
            Some(acceptor) => acceptor.start(self.io.queue_mut()),
            None => Ok(()),
        }
    }

    /// Accept on the context's own listening socket.
    pub fn accept_incoming(&mut self) -> Result<()> {
        let fd = self
            .listener_fd()
            .ok_or(RingportError::Config("context has no listening socket"))?;
        self.set_acceptor(SocketAcceptor::new(fd));
        self.start_acceptor()
    }

    /// Handle for posting closures onto this loop from other threads.
    /// Created (and its wake read armed) on first use.
    pub fn remote(&mut self) -> Result<Remote<Q>> {
        if let Some(waker) = self.waker.as_ref() {
            return Ok(waker.remote.clone());
        }
        let remote = Remote::new(self.io.config().remote_capacity)?;
        self.io.queue_mut().associate(remote.waker_fd())?;
        let mut waker = Waker { remote: remote.clone(), buf: Box::new([0u8; 8]) };
        waker.arm(&mut self.io)?;
        self.waker = Some(waker);
        Ok(remote)
    }

    /// Wait up to `timeout` (forever if `None`) for one completion and
    /// dispatch it. `Ok(true)` if something was dispatched, `Ok(false)` on
    /// timeout, `Err` on a fatal error.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if let Some(e) = self.io.take_fatal() {
            return Err(e);
        }
        match self.io.queue_mut().dequeue(timeout) {
            Dequeued::Completion(c) => {
                self.dispatch(c)?;
                match self.io.take_fatal() {
                    Some(e) => Err(e),
                    None => Ok(true),
                }
            }
            Dequeued::Timeout => Ok(false),
            Dequeued::Failed(e) => Err(e),
        }
    }

    /// Drain completions until something fatal happens, and return it.
    pub fn run(&mut self) -> RingportError {
        loop {
            if let Err(e) = self.poll(None) {
                rp_error!("event loop stopped: {}", e);
                return e;
            }
        }
    }

    fn dispatch(&mut self, c: Completion) -> Result<()> {
        rp_trace!("completion {:?} result={}", c.token, c.result);
        match classify(&c) {
            Event::Ignored => Ok(()),
            Event::Accepted { result } => self.on_accept(result),
            Event::Connected { conn, result } => {
                self.on_connect(conn, result);
                Ok(())
            }
            Event::Closed { conn, kind, result } => {
                self.on_close(conn, kind, result);
                Ok(())
            }
            Event::Received { conn, bytes } => self.on_receive(conn, bytes),
            Event::Sent { conn, bytes } => self.on_sent(conn, bytes),
            Event::Woken { result } => self.on_wake(result),
        }
    }

    fn on_accept(&mut self, result: i32) -> Result<()> {
        let adopted = if result >= 0 {
            // Safety: a successful accept returns a new fd nobody owns yet.
            let socket = unsafe { OwnedFd::from_raw_fd(result) };
            match self.io.adopt(socket) {
                Ok(id) => Some(id),
                Err(RingportError::SlabFull) => {
                    rp_warn!("connection limit reached, dropping accepted socket");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            self.io.note_accept_error(-result);
            None
        };

        // One accept outstanding at a time, re-armed ahead of the callback.
        self.start_acceptor()?;

        if let Some(id) = adopted {
            self.handlers.connected(&mut self.io, id);
        }
        Ok(())
    }

    fn on_connect(&mut self, conn: ConnId, result: i32) {
        if self.io.settle_stale(conn, OpKind::Connect) {
            return;
        }
        if self.io.finish_connect(conn, result) {
            self.handlers.connected(&mut self.io, conn);
        }
    }

    fn on_close(&mut self, conn: ConnId, kind: OpKind, result: i32) {
        if self.io.settle_stale(conn, kind) {
            return;
        }
        self.io.begin_close(conn, kind, result);
        self.handlers.disconnected(&mut self.io, conn);
        self.io.destroy(conn);
    }

    fn on_receive(&mut self, conn: ConnId, bytes: usize) -> Result<()> {
        if self.io.settle_stale(conn, OpKind::Read) {
            return Ok(());
        }
        let Some(buf) = self.io.lend_read_buffer(conn, bytes) else {
            return Ok(());
        };
        let n = bytes.min(buf.len());
        self.handlers.read(&mut self.io, conn, &buf[..n]);
        self.io.restore_read_buffer(conn, buf)
    }

    fn on_sent(&mut self, conn: ConnId, bytes: usize) -> Result<()> {
        if self.io.settle_stale(conn, OpKind::Write) {
            return Ok(());
        }
        if let Some(last) = self.io.advance_write(conn, bytes)? {
            self.handlers.write(&mut self.io, conn, last);
        }
        Ok(())
    }

    fn on_wake(&mut self, result: i32) -> Result<()> {
        let Some(waker) = self.waker.as_mut() else {
            return Ok(());
        };
        if result < 0 {
            return Err(RingportError::Os(-result));
        }
        let n = waker.remote.run_jobs(&mut self.io);
        rp_trace!("ran {} remote jobs", n);
        waker.arm(&mut self.io)
    }
}
