//! # ringport: completion-based TCP engine
//!
//! Connections are driven entirely by completions: every read, write,
//! accept and connect is submitted to a `CompletionQueue` (io_uring by
//! default) and comes back later as one completion, which the event loop
//! routes to a callback.
//!
//! | Module       | Role                                                   |
//! |--------------|--------------------------------------------------------|
//! | `context`    | `Context`: owns everything, runs the loop              |
//! | `io`         | `Io`: async_read / async_write / async_connect         |
//! | `connection` | per-connection socket and buffers                      |
//! | `dispatch`   | completion -> `Event` classification                   |
//! | `handlers`   | connected / read / write / disconnected callbacks      |
//! | `acceptor`   | who posts Accept operations                            |
//! | `remote`     | run closures on the loop thread from other threads     |
//! | `slab`       | generational storage behind `ConnId`                   |
//! | `config`     | `ContextConfig`, env overrides                         |
//!
//! # Example
//!
//! ```rust,ignore
//! use ringport::{Context, Handlers};
//!
//! let mut ctx = Context::init("0.0.0.0", 8080)?;
//! ctx.set_handlers(
//!     Handlers::new()
//!         .on_connected(|io, conn| { let _ = io.async_read(conn); })
//!         .on_read(|io, conn, data| { let _ = io.async_write(conn, data); })
//!         .on_write(|io, conn, _| { let _ = io.async_read(conn); }),
//! );
//! ctx.accept_incoming()?;
//! let err = ctx.run();
//! ```

pub mod acceptor;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod io;
pub mod remote;
pub mod slab;

#[cfg(test)]
pub(crate) mod testing;

pub use acceptor::{Acceptor, SocketAcceptor};
pub use config::{ContextConfig, WriteGrowth};
pub use connection::{ConnState, Connection};
pub use context::Context;
pub use handlers::Handlers;
pub use io::{Io, IoStats};
pub use remote::Remote;

pub use ringport_core::{ConnId, CompletionQueue, Result, RingportError};
pub use ringport_module::UringQueue;
