//! # ringport-core: Types and traits for the ringport completion engine
//!
//! This crate holds everything the engine and the OS backends agree on,
//! and nothing that talks to the OS itself:
//!
//! - `token` - `OpKind`, `ConnId` and the 64-bit `Token` stamped into
//!   every submission's `user_data`
//! - `queue` - the `CompletionQueue` trait, `Submission`, `Completion`
//!   and the discriminated `Dequeued` result
//! - `error` - `RingportError` and the crate `Result`
//! - `log` - leveled stderr macros (`rp_info!`, `rp_warn!`, ...)
//! - `env` - environment variable parsing used by the config layers
//!
//! Backends (`ringport-module`) implement `CompletionQueue`; the engine
//! (`ringport`) only ever sees the trait.

pub mod token;
pub mod queue;
pub mod error;
pub mod log;
pub mod env;

pub use token::{ConnId, OpKind, Token};
pub use queue::{BufDesc, Completion, CompletionQueue, Dequeued, Submission};
pub use error::{Result, RingportError};
pub use env::{env_get, env_get_bool, env_get_opt};
