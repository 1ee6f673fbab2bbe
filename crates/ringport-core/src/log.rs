//! Leveled stderr logging.
//!
//! One locked `stderr` write per line so lines from different threads never
//! interleave. Levels and flushing come from the environment on first use
//! and can be overridden programmatically.
//!
//! # Environment Variables
//!
//! - `RINGPORT_LOG_LEVEL=<level>` - `off|error|warn|info|debug|trace` or `0..5`
//! - `RINGPORT_FLUSH_LOG=1` - flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use ringport_core::{rp_info, rp_warn};
//!
//! rp_info!("listening on {}:{}", addr, port);
//! rp_warn!("accept failed: errno {}", -res);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);
static ENV_LOADED: Once = Once::new();

fn load_env() {
    ENV_LOADED.call_once(|| {
        if let Some(level) = std::env::var("RINGPORT_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        if crate::env::env_get_bool("RINGPORT_FLUSH_LOG", false) {
            FLUSH.store(true, Ordering::Relaxed);
        }
    });
}

/// Current threshold.
#[inline]
pub fn log_level() -> LogLevel {
    load_env();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the threshold (wins over the environment).
pub fn set_log_level(level: LogLevel) {
    load_env();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush(enabled: bool) {
    load_env();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(prefix: Option<LogLevel>, args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    if let Some(level) = prefix {
        let _ = write!(out, "[{}] ringport: ", level.tag());
    }
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _println_impl(args: std::fmt::Arguments<'_>) {
    load_env();
    emit(None, args);
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if enabled(level) {
        emit(Some(level), args);
    }
}

/// Unconditional line to stderr.
#[macro_export]
macro_rules! rp_println {
    ($($arg:tt)*) => {{
        $crate::log::_println_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rp_error {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rp_warn {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rp_info {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rp_debug {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Per-completion detail. Off unless `RINGPORT_LOG_LEVEL=trace`.
#[macro_export]
macro_rules! rp_trace {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}
