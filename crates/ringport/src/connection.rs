//! Per-connection state.
//!
//! A `Connection` owns its socket, a fixed-size read buffer and a growable
//! write buffer. The buffers double as the memory of the connection's
//! in-flight operations: the kernel writes into `read_buf` while a Read is
//! pending and reads `write_buf[sent..total]` while a Write is pending, so
//! neither may move or shrink until the completion is dequeued.
//!
//! Lifecycle:
//!
//! ```text
//!   async_connect ─▶ Connecting ──(Connect ok)──▶ Open ◀── accept
//!                        │                          │
//!                  (Connect failed)        (zero-byte / error)
//!                        │                          ▼
//!                        │                       Closing   (disconnected callback)
//!                        ▼                          │
//!                     Draining ◀────────────────────┘
//!                        │  (last pending completion)
//!                        ▼
//!                      freed
//! ```

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use ringport_core::queue::{BufDesc, Submission};
use ringport_core::token::OpKind;
use ringport_module::socket::{self, SockAddr};

use crate::config::WriteGrowth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Connect submitted, not yet completed.
    Connecting,
    /// Reads and writes allowed.
    Open,
    /// Disconnected callback running; no new operations.
    Closing,
    /// Destroyed, waiting for in-flight operations to come back.
    Draining,
}

pub struct Connection {
    /// `None` once the socket is closed during teardown.
    socket: Option<OwnedFd>,
    fd: RawFd,
    state: ConnState,
    /// `None` while the buffer is lent to the read callback.
    read_buf: Option<Box<[u8]>>,
    read_size: usize,
    write_buf: Vec<u8>,
    sent_bytes: usize,
    total_bytes: usize,
    read_pending: bool,
    /// Read requested while the buffer was lent; submitted once it returns.
    read_deferred: bool,
    write_pending: bool,
    connect_pending: bool,
    /// Destination of an in-flight connect. Boxed so the kernel's pointer
    /// stays valid when the slab grows.
    connect_addr: Option<Box<SockAddr>>,
}

impl Connection {
    /// Connection for an accepted socket.
    pub(crate) fn accepted(socket: OwnedFd, read_size: usize) -> Self {
        Self::with_state(socket, read_size, ConnState::Open)
    }

    /// Connection for an outbound socket whose connect is about to be
    /// submitted.
    pub(crate) fn connecting(socket: OwnedFd, read_size: usize, addr: SockAddr) -> Self {
        let mut conn = Self::with_state(socket, read_size, ConnState::Connecting);
        conn.connect_addr = Some(Box::new(addr));
        conn
    }

    fn with_state(socket: OwnedFd, read_size: usize, state: ConnState) -> Self {
        Self {
            fd: socket.as_raw_fd(),
            socket: Some(socket),
            state,
            read_buf: Some(vec![0u8; read_size].into_boxed_slice()),
            read_size,
            write_buf: Vec::new(),
            sent_bytes: 0,
            total_bytes: 0,
            read_pending: false,
            read_deferred: false,
            write_pending: false,
            connect_pending: false,
            connect_addr: None,
        }
    }

    // ── Accessors ──

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// The read buffer. Empty while it is lent to the read callback (the
    /// callback gets the filled part as its `data` argument).
    pub fn read_buffer(&self) -> &[u8] {
        self.read_buf.as_deref().unwrap_or(&[])
    }

    #[inline]
    pub fn read_buffer_size(&self) -> usize {
        self.read_size
    }

    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buf
    }

    #[inline]
    pub fn write_buffer_size(&self) -> usize {
        self.write_buf.len()
    }

    /// Grow the write buffer to `size` bytes. Never shrinks, and refuses to
    /// reallocate while a write is in flight. Returns whether the buffer is
    /// now at least `size` bytes.
    pub fn resize_write_buffer(&mut self, size: usize) -> bool {
        if size <= self.write_buf.len() {
            return true;
        }
        if self.write_pending {
            return false;
        }
        self.write_buf.resize(size, 0);
        true
    }

    #[inline]
    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub fn read_pending(&self) -> bool {
        self.read_pending
    }

    #[inline]
    pub fn write_pending(&self) -> bool {
        self.write_pending
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        socket::local_addr(self.fd).ok()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        socket::peer_addr(self.fd).ok()
    }

    // ── Engine side ──

    pub(crate) fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    /// Mark a read pending and build its submission. `None` means the
    /// buffer is lent out and the read was deferred instead.
    pub(crate) fn begin_read(&mut self) -> Option<Submission> {
        self.read_pending = true;
        match self.read_buf.as_deref_mut() {
            Some(buf) => Some(Submission::Recv { fd: self.fd, buf: BufDesc::from_mut(buf) }),
            None => {
                self.read_deferred = true;
                None
            }
        }
    }

    /// Read completed: hand the buffer to the caller for the callback.
    pub(crate) fn lend_read_buffer(&mut self) -> Option<Box<[u8]>> {
        self.read_pending = false;
        self.read_buf.take()
    }

    /// Buffer is back from the callback. Returns the deferred read's
    /// submission, if the callback asked for one.
    pub(crate) fn restore_read_buffer(&mut self, buf: Box<[u8]>) -> Option<Submission> {
        self.read_buf = Some(buf);
        if !std::mem::take(&mut self.read_deferred) {
            return None;
        }
        self.read_buf
            .as_deref_mut()
            .map(|buf| Submission::Recv { fd: self.fd, buf: BufDesc::from_mut(buf) })
    }

    /// Copy `data` into the write buffer (growing it per `growth`) and
    /// build the send for the whole payload.
    pub(crate) fn begin_write(&mut self, data: &[u8], growth: WriteGrowth) -> Submission {
        let size = data.len();
        let new_len = growth.grow(self.write_buf.len(), size);
        if new_len > self.write_buf.len() {
            self.write_buf.resize(new_len, 0);
        }
        self.write_buf[..size].copy_from_slice(data);
        self.sent_bytes = 0;
        self.total_bytes = size;
        self.write_pending = true;
        self.send_remaining()
    }

    fn send_remaining(&self) -> Submission {
        Submission::Send {
            fd: self.fd,
            buf: BufDesc::from_ref(&self.write_buf[self.sent_bytes..self.total_bytes]),
        }
    }

    /// Account for `n` bytes sent. Returns the continuation send while bytes
    /// remain, `None` once the write is complete.
    pub(crate) fn advance_write(&mut self, n: usize) -> Option<Submission> {
        self.sent_bytes = (self.sent_bytes + n).min(self.total_bytes);
        if self.sent_bytes < self.total_bytes {
            Some(self.send_remaining())
        } else {
            self.write_pending = false;
            None
        }
    }

    pub(crate) fn begin_connect(&mut self) -> Option<Submission> {
        let addr = self.connect_addr.as_deref()?;
        self.connect_pending = true;
        Some(Submission::Connect {
            fd: self.fd,
            addr: BufDesc { ptr: addr.as_ptr() as *mut u8, len: addr.len() },
        })
    }

    pub(crate) fn finish_connect(&mut self) {
        self.connect_pending = false;
        self.connect_addr = None;
    }

    /// Clear the pending flag of an operation that came back.
    pub(crate) fn settle(&mut self, kind: OpKind) {
        match kind {
            OpKind::Read => {
                self.read_pending = false;
                self.read_deferred = false;
            }
            OpKind::Write => self.write_pending = false,
            OpKind::Connect => self.connect_pending = false,
            OpKind::Accept | OpKind::Wake | OpKind::Cancel => {}
        }
    }

    /// Operations the kernel still holds buffers for. A deferred read was
    /// never submitted, so it does not count.
    pub(crate) fn inflight_kinds(&self) -> impl Iterator<Item = OpKind> {
        let read = self.read_pending && !self.read_deferred;
        [
            (read, OpKind::Read),
            (self.write_pending, OpKind::Write),
            (self.connect_pending, OpKind::Connect),
        ]
        .into_iter()
        .filter_map(|(pending, kind)| pending.then_some(kind))
    }

    pub(crate) fn has_inflight(&self) -> bool {
        self.inflight_kinds().next().is_some()
    }

    /// Close the socket. In-flight operations keep the kernel's file
    /// reference and complete (or get cancelled) on their own.
    pub(crate) fn close(&mut self) {
        self.socket = None;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("state", &self.state)
            .field("read_pending", &self.read_pending)
            .field("write_pending", &self.write_pending)
            .field("sent_bytes", &self.sent_bytes)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn conn(read_size: usize) -> (Connection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::accepted(OwnedFd::from(a), read_size), b)
    }

    #[test]
    fn test_new_connection() {
        let (c, _peer) = conn(64);
        assert!(c.is_open());
        assert_eq!(c.read_buffer_size(), 64);
        assert_eq!(c.read_buffer().len(), 64);
        assert_eq!(c.write_buffer_size(), 0);
        assert!(!c.read_pending());
        assert!(!c.write_pending());
        assert!(!c.has_inflight());
    }

    #[test]
    fn test_write_grows_and_copies() {
        let (mut c, _peer) = conn(16);
        let op = c.begin_write(b"HELLOWORLD", WriteGrowth::Exact);
        assert_eq!(c.write_buffer_size(), 10);
        assert_eq!(&c.write_buffer()[..10], b"HELLOWORLD");
        assert_eq!(c.total_bytes(), 10);
        assert_eq!(c.sent_bytes(), 0);
        assert!(c.write_pending());
        match op {
            Submission::Send { fd, buf } => {
                assert_eq!(fd, c.fd());
                assert_eq!(buf.len, 10);
                assert_eq!(buf.ptr as *const u8, c.write_buffer().as_ptr());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_write_amortized_growth() {
        let (mut c, _peer) = conn(16);
        c.begin_write(&[7u8; 100], WriteGrowth::Amortized);
        assert_eq!(c.write_buffer_size(), 128);
        assert_eq!(&c.write_buffer()[..100], &[7u8; 100][..]);
    }

    #[test]
    fn test_smaller_write_reuses_buffer() {
        let (mut c, _peer) = conn(16);
        c.begin_write(b"0123456789", WriteGrowth::Exact);
        c.advance_write(10);
        c.begin_write(b"abc", WriteGrowth::Exact);
        assert_eq!(c.write_buffer_size(), 10);
        assert_eq!(&c.write_buffer()[..3], b"abc");
        assert_eq!(c.total_bytes(), 3);
    }

    #[test]
    fn test_partial_write_continuation() {
        let (mut c, _peer) = conn(16);
        c.begin_write(b"HELLOWORLD", WriteGrowth::Exact);

        match c.advance_write(4) {
            Some(Submission::Send { buf, .. }) => {
                assert_eq!(buf.len, 6);
                assert_eq!(buf.ptr as *const u8, c.write_buffer()[4..].as_ptr());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(c.sent_bytes(), 4);
        assert!(c.write_pending());

        assert!(c.advance_write(6).is_none());
        assert_eq!(c.sent_bytes(), 10);
        assert!(!c.write_pending());
    }

    #[test]
    fn test_resize_refused_while_writing() {
        let (mut c, _peer) = conn(16);
        assert!(c.resize_write_buffer(32));
        assert_eq!(c.write_buffer_size(), 32);
        c.begin_write(b"x", WriteGrowth::Exact);
        assert!(!c.resize_write_buffer(64));
        assert!(c.resize_write_buffer(8));
        assert_eq!(c.write_buffer_size(), 32);
    }

    #[test]
    fn test_read_deferred_while_lent() {
        let (mut c, _peer) = conn(8);
        assert!(c.begin_read().is_some());
        let buf = c.lend_read_buffer().unwrap();
        assert!(!c.read_pending());
        assert!(c.read_buffer().is_empty());

        assert!(c.begin_read().is_none());
        assert!(c.read_pending());
        // deferred read is not in flight yet
        assert!(!c.has_inflight());

        match c.restore_read_buffer(buf) {
            Some(Submission::Recv { buf, .. }) => assert_eq!(buf.len, 8),
            other => panic!("unexpected {:?}", other),
        }
        assert!(c.read_pending());
        assert_eq!(c.inflight_kinds().collect::<Vec<_>>(), vec![OpKind::Read]);
    }

    #[test]
    fn test_settle_clears_inflight() {
        let (mut c, _peer) = conn(8);
        c.begin_read();
        c.begin_write(b"hi", WriteGrowth::Exact);
        assert_eq!(
            c.inflight_kinds().collect::<Vec<_>>(),
            vec![OpKind::Read, OpKind::Write]
        );
        c.settle(OpKind::Read);
        c.settle(OpKind::Write);
        assert!(!c.has_inflight());
    }

    #[test]
    fn test_close_keeps_buffers() {
        let (mut c, _peer) = conn(8);
        c.begin_write(b"abc", WriteGrowth::Exact);
        c.close();
        assert!(c.is_closed());
        assert_eq!(&c.write_buffer()[..3], b"abc");
        assert_eq!(c.read_buffer().len(), 8);
    }
}
