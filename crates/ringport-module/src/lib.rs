//! # ringport-module: Default (Linux) implementations
//!
//! | Piece            | Default impl | Notes                                  |
//! |------------------|--------------|----------------------------------------|
//! | CompletionQueue  | UringQueue   | io_uring, no SQPOLL, no fixed files    |
//! | Listening socket | Socket       | socket/bind/listen via libc            |
//! | Cross-thread wake| EventFd      | blocking eventfd read kept on the ring |

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod uring_queue;
        pub mod socket;
        pub mod eventfd;

        pub use uring_queue::{UringQueue, UringQueueConfig};
        pub use socket::{set_nodelay, SockAddr, Socket};
        pub use eventfd::EventFd;
    } else {
        compile_error!("ringport-module needs Linux io_uring");
    }
}

/// Raw errno value carried by ringport's error variants.
#[inline]
pub(crate) fn errno_code(e: nix::errno::Errno) -> i32 {
    e as i32
}
