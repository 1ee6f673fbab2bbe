//! `Io`: the handle callbacks use to drive connections.
//!
//! Owns the completion queue and the connection slab. User-facing
//! operations (`async_read`, `async_write`, `async_connect`, `shutdown`)
//! are the only way to start I/O; the `pub(crate)` half is what the event
//! loop calls while dispatching completions.
//!
//! # Teardown
//!
//! The engine is the only place a connection is destroyed. `destroy()`
//! closes the socket, releases it from the queue, and cancels whatever the
//! kernel still holds. If nothing is in flight the slot is freed at once;
//! otherwise the connection is left *draining*: invisible to callers, its
//! buffers alive, until the last outstanding completion comes back and is
//! swallowed without a callback.
//!
//! # Fatal errors
//!
//! A fatal submit error (queue full, queue gone) is returned to whoever
//! called the operation *and* latched here; the loop checks the latch
//! after each dispatch and stops.

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;

use ringport_core::error::{Result, RingportError};
use ringport_core::queue::{CompletionQueue, Submission};
use ringport_core::token::{ConnId, OpKind, Token};
use ringport_core::{rp_debug, rp_trace, rp_warn};
use ringport_module::socket::{set_nodelay, Socket};

use crate::config::ContextConfig;
use crate::connection::{ConnState, Connection};
use crate::slab::Slab;

/// Engine counters, readable from callbacks and `Remote` jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoStats {
    pub accepts: u64,
    pub accept_errors: u64,
    pub connects: u64,
    pub connect_errors: u64,
    /// Read completions delivered to the read callback
    pub reads: u64,
    /// Writes completed (after any continuations)
    pub writes: u64,
    /// Sends resubmitted after a partial write
    pub continuations: u64,
    pub disconnects: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl fmt::Display for IoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepts={} connects={} reads={} writes={} partial={} closes={} bytes_in={} bytes_out={} err={}",
            self.accepts,
            self.connects,
            self.reads,
            self.writes,
            self.continuations,
            self.disconnects,
            self.bytes_in,
            self.bytes_out,
            self.accept_errors + self.connect_errors,
        )
    }
}

pub struct Io<Q: CompletionQueue> {
    // Dropped before the slab: the ring goes away before the buffers it
    // may still point at.
    queue: Q,
    conns: Slab<Connection>,
    config: ContextConfig,
    stats: IoStats,
    fatal: Option<RingportError>,
}

impl<Q: CompletionQueue> Io<Q> {
    pub(crate) fn new(queue: Q, config: ContextConfig) -> Self {
        Self {
            queue,
            conns: Slab::new(config.max_connections),
            config,
            stats: IoStats::default(),
            fatal: None,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Look up a live connection. Draining connections are never returned.
    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(id).filter(|c| c.state() != ConnState::Draining)
    }

    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.get_mut(id).filter(|c| c.state() != ConnState::Draining)
    }

    /// Live connections (draining ones excluded).
    pub fn connection_count(&self) -> usize {
        self.conns
            .iter()
            .filter(|(_, c)| c.state() != ConnState::Draining)
            .count()
    }

    /// Slots still held by draining connections.
    pub fn draining_count(&self) -> usize {
        self.conns.len() - self.connection_count()
    }

    // ── User operations ──

    /// Receive into the connection's read buffer. The read callback fires
    /// when data arrives; a zero-byte or failed receive disconnects.
    ///
    /// Called from inside this connection's read callback, the receive is
    /// submitted as soon as the callback returns.
    pub fn async_read(&mut self, id: ConnId) -> Result<()> {
        let conn = self.open_mut(id)?;
        if conn.read_pending() {
            return Err(RingportError::ReadPending(id));
        }
        match conn.begin_read() {
            Some(op) => self.submit_for(id, OpKind::Read, op),
            None => Ok(()),
        }
    }

    /// Copy `data` into the write buffer and send all of it, continuing
    /// after partial sends. The write callback fires once, after the last
    /// byte is sent.
    pub fn async_write(&mut self, id: ConnId, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(RingportError::EmptyWrite);
        }
        let growth = self.config.write_growth;
        let conn = self.open_mut(id)?;
        if conn.write_pending() {
            return Err(RingportError::WritePending(id));
        }
        let op = conn.begin_write(data, growth);
        self.submit_for(id, OpKind::Write, op)
    }

    /// Open an outbound TCP connection. The connected callback fires when
    /// the connect succeeds; a failed connect is logged and the connection
    /// dropped without callbacks.
    pub fn async_connect(&mut self, addr: SocketAddr) -> Result<ConnId> {
        let (socket, sockaddr) = Socket::connect_stream(addr)?;
        let fd = socket.as_raw_fd();
        let id = self.conns.insert(Connection::connecting(
            socket,
            self.config.read_buffer_size,
            sockaddr,
        ))?;

        if let Err(e) = self.queue.associate(fd) {
            self.conns.remove(id);
            return Err(self.latch(e));
        }
        let op = self.conns.get_mut(id).and_then(|c| c.begin_connect());
        let result = match op {
            Some(op) => self.submit(Token::new(OpKind::Connect, id), op),
            None => Err(RingportError::UnknownConnection(id)),
        };
        if let Err(e) = result {
            self.queue.release(fd);
            self.conns.remove(id);
            return Err(e);
        }
        rp_debug!("{} connecting to {}", id, addr);
        Ok(id)
    }

    /// Shut down both directions of the socket. A pending read then
    /// completes with zero bytes and the connection goes through the
    /// normal disconnect path.
    pub fn shutdown(&mut self, id: ConnId) -> Result<()> {
        let fd = self.open_mut(id)?.fd();
        Errno::result(unsafe { libc::shutdown(fd, libc::SHUT_RDWR) })
            .map(drop)
            .map_err(|e| RingportError::Os(e as i32))
    }

    fn open_mut(&mut self, id: ConnId) -> Result<&mut Connection> {
        let conn = self
            .connection_mut(id)
            .ok_or(RingportError::UnknownConnection(id))?;
        if !conn.is_open() {
            return Err(RingportError::NotConnected(id));
        }
        Ok(conn)
    }

    // ── Submission plumbing ──

    fn latch(&mut self, e: RingportError) -> RingportError {
        if e.is_fatal() && self.fatal.is_none() {
            self.fatal = Some(e.clone());
        }
        e
    }

    fn submit(&mut self, token: Token, op: Submission) -> Result<()> {
        self.queue.submit(token, op).map_err(|e| self.latch(e))
    }

    /// Submit an operation owned by `id`; if it never reached the queue,
    /// it is not pending either.
    fn submit_for(&mut self, id: ConnId, kind: OpKind, op: Submission) -> Result<()> {
        let result = self.submit(Token::new(kind, id), op);
        if result.is_err() {
            if let Some(conn) = self.conns.get_mut(id) {
                conn.settle(kind);
            }
        }
        result
    }

    pub(crate) fn take_fatal(&mut self) -> Option<RingportError> {
        self.fatal.take()
    }

    // ── Loop side ──

    /// Take ownership of an accepted socket.
    pub(crate) fn adopt(&mut self, socket: OwnedFd) -> Result<ConnId> {
        let fd = socket.as_raw_fd();
        if self.config.nodelay {
            if let Err(e) = set_nodelay(fd) {
                rp_debug!("TCP_NODELAY on fd {}: {}", fd, e);
            }
        }
        // On SlabFull the socket is dropped (closed) with the connection.
        let id = self
            .conns
            .insert(Connection::accepted(socket, self.config.read_buffer_size))?;
        if let Err(e) = self.queue.associate(fd) {
            self.conns.remove(id);
            return Err(self.latch(e));
        }
        self.stats.accepts += 1;
        rp_trace!("{} accepted on fd {}", id, fd);
        Ok(id)
    }

    pub(crate) fn note_accept_error(&mut self, errno: i32) {
        self.stats.accept_errors += 1;
        rp_warn!("accept failed: errno {}", errno);
    }

    /// Completions for connections that are gone or draining are consumed
    /// here. Returns `true` when the caller must not act on the completion.
    pub(crate) fn settle_stale(&mut self, id: ConnId, kind: OpKind) -> bool {
        let Some(conn) = self.conns.get_mut(id) else {
            rp_trace!("{:?} completion for retired {}", kind, id);
            return true;
        };
        if conn.state() != ConnState::Draining {
            return false;
        }
        conn.settle(kind);
        if !conn.has_inflight() {
            self.conns.remove(id);
            rp_trace!("{} drained", id);
        }
        true
    }

    /// Connect completion for a live connection. Returns whether the
    /// connected callback should fire.
    pub(crate) fn finish_connect(&mut self, id: ConnId, result: i32) -> bool {
        let nodelay = self.config.nodelay;
        let Some(conn) = self.conns.get_mut(id) else {
            return false;
        };
        conn.finish_connect();
        if result < 0 {
            self.stats.connect_errors += 1;
            rp_warn!("{} connect failed: errno {}", id, -result);
            self.destroy(id);
            return false;
        }
        conn.set_state(ConnState::Open);
        if nodelay {
            if let Err(e) = set_nodelay(conn.fd()) {
                rp_debug!("TCP_NODELAY on {}: {}", id, e);
            }
        }
        self.stats.connects += 1;
        true
    }

    /// Read completion: hand out the read buffer for the callback.
    pub(crate) fn lend_read_buffer(&mut self, id: ConnId, bytes: usize) -> Option<Box<[u8]>> {
        let buf = self.conns.get_mut(id)?.lend_read_buffer()?;
        self.stats.reads += 1;
        self.stats.bytes_in += bytes as u64;
        Some(buf)
    }

    /// Read callback returned: take the buffer back and submit the read
    /// the callback asked for, if any.
    pub(crate) fn restore_read_buffer(&mut self, id: ConnId, buf: Box<[u8]>) -> Result<()> {
        let Some(conn) = self.conns.get_mut(id) else {
            return Ok(());
        };
        match conn.restore_read_buffer(buf) {
            Some(op) => self.submit_for(id, OpKind::Read, op),
            None => Ok(()),
        }
    }

    /// Write completion of `n` bytes. `Some(n)` once the whole payload is
    /// out; `None` while a continuation send is in flight.
    pub(crate) fn advance_write(&mut self, id: ConnId, n: usize) -> Result<Option<usize>> {
        let Some(conn) = self.conns.get_mut(id) else {
            return Ok(None);
        };
        self.stats.bytes_out += n as u64;
        match conn.advance_write(n) {
            Some(op) => {
                rp_trace!("{} partial write {}/{}", id, conn.sent_bytes(), conn.total_bytes());
                self.stats.continuations += 1;
                self.submit_for(id, OpKind::Write, op)?;
                Ok(None)
            }
            None => {
                self.stats.writes += 1;
                Ok(Some(n))
            }
        }
    }

    /// First half of a disconnect: the operation that reported it is no
    /// longer pending and no new operations are accepted. Callers may still
    /// inspect the connection from the disconnected callback.
    pub(crate) fn begin_close(&mut self, id: ConnId, kind: OpKind, result: i32) {
        if let Some(conn) = self.conns.get_mut(id) {
            conn.settle(kind);
            conn.set_state(ConnState::Closing);
        }
        if result < 0 {
            rp_debug!("{} {:?} failed: errno {}", id, kind, -result);
        } else {
            rp_trace!("{} closed by peer", id);
        }
        self.stats.disconnects += 1;
    }

    /// Close the socket and free the slot, or leave it draining until the
    /// kernel returns every buffer.
    pub(crate) fn destroy(&mut self, id: ConnId) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        conn.set_state(ConnState::Draining);
        let fd = conn.fd();
        let inflight = conn.inflight_kinds();
        conn.close();

        self.queue.release(fd);
        for kind in inflight {
            let cancel = Submission::Cancel { target: Token::new(kind, id) };
            if let Err(e) = self.submit(Token::detached(OpKind::Cancel), cancel) {
                rp_warn!("cancel {:?} on {}: {}", kind, id, e);
            }
        }
        self.settle_stale(id, OpKind::Cancel);
    }
}
