//! Completion classification.
//!
//! One match over `(kind, result)` turns a raw completion into the event
//! the loop acts on. Arm order is the precedence:
//!
//! 1. null token, unknown kind, Cancel -> `Ignored`
//! 2. Accept -> `Accepted` (result is the new fd or -errno)
//! 3. Connect -> `Connected` (result is 0 or -errno)
//! 4. Read/Write with `result <= 0` -> `Closed`
//! 5. Read -> `Received`
//! 6. Write -> `Sent`
//! 7. Wake -> `Woken`
//!
//! Accept and Connect never reach the zero-byte check: a zero there is
//! a valid fd or a successful connect.

use ringport_core::queue::Completion;
use ringport_core::token::{ConnId, OpKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Ignored,
    Accepted { result: i32 },
    Connected { conn: ConnId, result: i32 },
    /// Remote close (`result == 0`) or socket error (`-errno`).
    Closed { conn: ConnId, kind: OpKind, result: i32 },
    Received { conn: ConnId, bytes: usize },
    Sent { conn: ConnId, bytes: usize },
    Woken { result: i32 },
}

#[inline]
pub fn classify(c: &Completion) -> Event {
    let token = c.token;
    match (token.kind(), c.result) {
        (None, _) | (Some(OpKind::Cancel), _) => Event::Ignored,
        (Some(OpKind::Accept), result) => Event::Accepted { result },
        (Some(OpKind::Connect), result) => Event::Connected { conn: token.conn(), result },
        (Some(kind @ (OpKind::Read | OpKind::Write)), result) if result <= 0 => {
            Event::Closed { conn: token.conn(), kind, result }
        }
        (Some(OpKind::Read), n) => Event::Received { conn: token.conn(), bytes: n as usize },
        (Some(OpKind::Write), n) => Event::Sent { conn: token.conn(), bytes: n as usize },
        (Some(OpKind::Wake), result) => Event::Woken { result },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringport_core::token::Token;

    fn at(kind: OpKind, result: i32) -> Event {
        classify(&Completion::new(Token::new(kind, ConnId::new(3, 7)), result))
    }

    #[test]
    fn test_null_and_cancel_ignored() {
        assert_eq!(classify(&Completion::new(Token::NONE, 5)), Event::Ignored);
        assert_eq!(classify(&Completion::new(Token(0xFF << 56), 5)), Event::Ignored);
        assert_eq!(at(OpKind::Cancel, 0), Event::Ignored);
        assert_eq!(at(OpKind::Cancel, -libc::ENOENT), Event::Ignored);
    }

    #[test]
    fn test_accept_and_connect_exempt_from_zero_check() {
        assert_eq!(at(OpKind::Accept, 0), Event::Accepted { result: 0 });
        assert_eq!(
            at(OpKind::Connect, 0),
            Event::Connected { conn: ConnId::new(3, 7), result: 0 }
        );
        assert_eq!(
            at(OpKind::Connect, -libc::ECONNREFUSED),
            Event::Connected { conn: ConnId::new(3, 7), result: -libc::ECONNREFUSED }
        );
    }

    #[test]
    fn test_zero_or_error_closes() {
        let conn = ConnId::new(3, 7);
        assert_eq!(at(OpKind::Read, 0), Event::Closed { conn, kind: OpKind::Read, result: 0 });
        assert_eq!(at(OpKind::Write, 0), Event::Closed { conn, kind: OpKind::Write, result: 0 });
        assert_eq!(
            at(OpKind::Read, -libc::ECONNRESET),
            Event::Closed { conn, kind: OpKind::Read, result: -libc::ECONNRESET }
        );
    }

    #[test]
    fn test_transfers() {
        let conn = ConnId::new(3, 7);
        assert_eq!(at(OpKind::Read, 12), Event::Received { conn, bytes: 12 });
        assert_eq!(at(OpKind::Write, 4), Event::Sent { conn, bytes: 4 });
        assert_eq!(
            classify(&Completion::new(Token::detached(OpKind::Wake), 8)),
            Event::Woken { result: 8 }
        );
    }
}
