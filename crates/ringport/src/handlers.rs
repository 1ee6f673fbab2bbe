//! Connection event callbacks.
//!
//! Every callback runs on the loop thread, synchronously, and gets the
//! `Io` handle so it can start the next operation on the same or any other
//! connection. All four are optional; an unset callback drops the event.
//!
//! ```rust,ignore
//! let handlers = Handlers::new()
//!     .on_connected(|io, conn| { let _ = io.async_read(conn); })
//!     .on_read(|io, conn, data| { let _ = io.async_write(conn, data); })
//!     .on_write(|io, conn, _| { let _ = io.async_read(conn); });
//! ```

use ringport_core::queue::CompletionQueue;
use ringport_core::token::ConnId;

use crate::io::Io;

pub type ConnectedFn<Q> = Box<dyn FnMut(&mut Io<Q>, ConnId)>;
/// Receives the bytes the completed read put in the connection's buffer.
pub type ReadFn<Q> = Box<dyn FnMut(&mut Io<Q>, ConnId, &[u8])>;
/// Receives the byte count of the send that finished the write.
pub type WriteFn<Q> = Box<dyn FnMut(&mut Io<Q>, ConnId, usize)>;
pub type DisconnectedFn<Q> = Box<dyn FnMut(&mut Io<Q>, ConnId)>;

pub struct Handlers<Q: CompletionQueue> {
    connected: Option<ConnectedFn<Q>>,
    read: Option<ReadFn<Q>>,
    write: Option<WriteFn<Q>>,
    disconnected: Option<DisconnectedFn<Q>>,
}

impl<Q: CompletionQueue> Default for Handlers<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: CompletionQueue> Handlers<Q> {
    pub fn new() -> Self {
        Self {
            connected: None,
            read: None,
            write: None,
            disconnected: None,
        }
    }

    /// Accepted connection is ready, or an outbound connect succeeded.
    pub fn on_connected(mut self, f: impl FnMut(&mut Io<Q>, ConnId) + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    /// A read completed with at least one byte.
    pub fn on_read(mut self, f: impl FnMut(&mut Io<Q>, ConnId, &[u8]) + 'static) -> Self {
        self.read = Some(Box::new(f));
        self
    }

    /// Every byte of the last `async_write` has been sent.
    pub fn on_write(mut self, f: impl FnMut(&mut Io<Q>, ConnId, usize) + 'static) -> Self {
        self.write = Some(Box::new(f));
        self
    }

    /// Peer closed or the socket failed. The connection is destroyed right
    /// after this returns.
    pub fn on_disconnected(mut self, f: impl FnMut(&mut Io<Q>, ConnId) + 'static) -> Self {
        self.disconnected = Some(Box::new(f));
        self
    }

    pub(crate) fn connected(&mut self, io: &mut Io<Q>, conn: ConnId) {
        if let Some(f) = self.connected.as_mut() {
            f(io, conn);
        }
    }

    pub(crate) fn read(&mut self, io: &mut Io<Q>, conn: ConnId, data: &[u8]) {
        if let Some(f) = self.read.as_mut() {
            f(io, conn, data);
        }
    }

    pub(crate) fn write(&mut self, io: &mut Io<Q>, conn: ConnId, bytes: usize) {
        if let Some(f) = self.write.as_mut() {
            f(io, conn, bytes);
        }
    }

    pub(crate) fn disconnected(&mut self, io: &mut Io<Q>, conn: ConnId) {
        if let Some(f) = self.disconnected.as_mut() {
            f(io, conn);
        }
    }
}
