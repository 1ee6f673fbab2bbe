//! Operation tokens.
//!
//! Every submission carries a 64-bit token in the completion queue's
//! `user_data` field. The token is the whole "operation context" as far as
//! the kernel is concerned: it says what kind of operation finished and
//! which connection slot it belongs to, so a completion can be routed
//! without any lookup table.
//!
//! ```text
//!  63        56 55                32 31                         0
//! ┌────────────┬────────────────────┬────────────────────────────┐
//! │   OpKind   │  generation (24b)  │        slot index          │
//! └────────────┴────────────────────┴────────────────────────────┘
//! ```
//!
//! Token `0` is the null token: kind byte `0` is never assigned.

use core::fmt;

const KIND_SHIFT: u32 = 56;
const GEN_SHIFT: u32 = 32;
const GEN_MASK: u64 = 0x00FF_FFFF;
const SLOT_MASK: u64 = 0xFFFF_FFFF;

/// Generations wrap inside the 24 bits the token reserves for them.
pub const GENERATION_MASK: u32 = GEN_MASK as u32;

/// What an in-flight operation was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpKind {
    /// Listening socket produced a new connection.
    Accept = 1,
    /// Outbound connection attempt finished.
    Connect = 2,
    /// Receive into the connection's read buffer.
    Read = 3,
    /// Send from the connection's write buffer.
    Write = 4,
    /// Cross-thread wake-up read on the engine's eventfd.
    Wake = 5,
    /// Cancellation request; its own completion carries no information.
    Cancel = 6,
}

impl OpKind {
    /// Decode the kind byte. `None` for the null byte and anything unknown.
    #[inline]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(OpKind::Accept),
            2 => Some(OpKind::Connect),
            3 => Some(OpKind::Read),
            4 => Some(OpKind::Write),
            5 => Some(OpKind::Wake),
            6 => Some(OpKind::Cancel),
            _ => None,
        }
    }
}

/// Opaque handle to a connection slot.
///
/// A `ConnId` stays valid only as long as the slot's generation matches;
/// once the engine frees the slot, every copy of the old id goes stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId {
    slot: u32,
    generation: u32,
}

impl ConnId {
    /// Placeholder id for tokens that do not refer to a connection.
    pub const NONE: ConnId = ConnId { slot: u32::MAX, generation: 0 };

    #[inline]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation: generation & GENERATION_MASK }
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.slot == u32::MAX
    }
}

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ConnId(NONE)")
        } else {
            write!(f, "ConnId({}.{})", self.slot, self.generation)
        }
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "conn#none")
        } else {
            write!(f, "conn#{}.{}", self.slot, self.generation)
        }
    }
}

/// The `user_data` value attached to a submission.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Token(pub u64);

impl Token {
    /// The null token. Completions carrying it are ignored.
    pub const NONE: Token = Token(0);

    /// Build the token for an operation of `kind` on `conn`.
    #[inline]
    pub const fn new(kind: OpKind, conn: ConnId) -> Self {
        let gen = (conn.generation as u64) & GEN_MASK;
        let slot = (conn.slot as u64) & SLOT_MASK;
        Token(((kind as u64) << KIND_SHIFT) | (gen << GEN_SHIFT) | slot)
    }

    /// Token for an operation with no owning connection (accept, wake).
    #[inline]
    pub const fn detached(kind: OpKind) -> Self {
        Self::new(kind, ConnId::NONE)
    }

    #[inline]
    pub const fn kind(self) -> Option<OpKind> {
        OpKind::from_u8((self.0 >> KIND_SHIFT) as u8)
    }

    #[inline]
    pub const fn conn(self) -> ConnId {
        ConnId::new(
            (self.0 & SLOT_MASK) as u32,
            ((self.0 >> GEN_SHIFT) & GEN_MASK) as u32,
        )
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Token({:?}, {:?})", kind, self.conn()),
            None => write!(f, "Token(0x{:016x})", self.0),
        }
    }
}
