//! Environment variable helpers for the config layers.
//!
//! ```ignore
//! use ringport_core::env::{env_get, env_get_bool};
//!
//! let sq: u32 = env_get("RINGPORT_SQ_ENTRIES", 256);
//! let verbose = env_get_bool("RINGPORT_VERBOSE", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`; unset or unparsable values fall back to `default`.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T`, or `None` if unset or unparsable.
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: `1`, `true`, `yes`, `on` (any case) are true; any other
/// set value is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
