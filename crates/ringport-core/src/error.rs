//! Ringport error types.

use std::fmt;
use std::os::fd::RawFd;

use crate::token::ConnId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingportError {
    /// Completion queue could not be created.
    QueueSetup(i32),
    /// Flushing submissions to the kernel failed.
    QueueSubmit(i32),
    /// Waiting for completions failed.
    QueueWait(i32),
    /// Submission queue stayed full after a flush.
    QueueFull,
    /// Socket creation, bind or listen failed.
    Socket(i32),
    /// Address string did not parse.
    InvalidAddress,
    /// Socket was already bound to this completion queue.
    AlreadyAssociated(RawFd),
    /// Submission on a socket that was never associated.
    NotAssociated(RawFd),
    /// Any other OS error with errno.
    Os(i32),
    /// Configuration rejected by `validate()`.
    Config(&'static str),
    /// Connection id is stale or was never issued.
    UnknownConnection(ConnId),
    /// Connection is still connecting, or is being torn down.
    NotConnected(ConnId),
    /// A read is already pending on this connection.
    ReadPending(ConnId),
    /// A write (or its continuation) is still pending on this connection.
    WritePending(ConnId),
    /// Zero-length writes are indistinguishable from a remote close.
    EmptyWrite,
    /// Every connection slot is in use.
    SlabFull,
    /// The cross-thread command queue is full.
    RemoteFull,
}

impl RingportError {
    /// Fatal errors end the event loop; the rest are caller mistakes
    /// reported back to the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnknownConnection(_)
                | Self::NotConnected(_)
                | Self::ReadPending(_)
                | Self::WritePending(_)
                | Self::EmptyWrite
                | Self::SlabFull
                | Self::RemoteFull
        )
    }
}

impl fmt::Display for RingportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueSetup(e) => write!(f, "completion queue setup: errno {}", e),
            Self::QueueSubmit(e) => write!(f, "completion queue submit: errno {}", e),
            Self::QueueWait(e) => write!(f, "completion queue wait: errno {}", e),
            Self::QueueFull => write!(f, "submission queue full"),
            Self::Socket(e) => write!(f, "socket setup: errno {}", e),
            Self::InvalidAddress => write!(f, "invalid socket address"),
            Self::AlreadyAssociated(fd) => write!(f, "fd {} already associated", fd),
            Self::NotAssociated(fd) => write!(f, "fd {} not associated with the queue", fd),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
            Self::Config(msg) => write!(f, "invalid config: {}", msg),
            Self::UnknownConnection(id) => write!(f, "unknown connection {}", id),
            Self::NotConnected(id) => write!(f, "{} is not connected", id),
            Self::ReadPending(id) => write!(f, "read already pending on {}", id),
            Self::WritePending(id) => write!(f, "write already pending on {}", id),
            Self::EmptyWrite => write!(f, "empty write"),
            Self::SlabFull => write!(f, "connection slab full"),
            Self::RemoteFull => write!(f, "remote command queue full"),
        }
    }
}

impl std::error::Error for RingportError {}

pub type Result<T> = std::result::Result<T, RingportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            RingportError::QueueSetup(12).to_string(),
            "completion queue setup: errno 12"
        );
        assert_eq!(
            RingportError::WritePending(ConnId::new(3, 1)).to_string(),
            "write already pending on conn#3.1"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RingportError::QueueFull.is_fatal());
        assert!(RingportError::NotAssociated(4).is_fatal());
        assert!(!RingportError::ReadPending(ConnId::new(0, 0)).is_fatal());
        assert!(!RingportError::EmptyWrite.is_fatal());
        assert!(!RingportError::SlabFull.is_fatal());
    }
}
