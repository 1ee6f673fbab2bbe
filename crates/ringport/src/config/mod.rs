//! Engine configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use ringport::config::{ContextConfig, WriteGrowth};
//!
//! let config = ContextConfig::from_env()
//!     .read_buffer_size(16 * 1024)
//!     .write_growth(WriteGrowth::Amortized);
//! ```

pub mod defaults;

use std::fmt;
use std::str::FromStr;

use ringport_core::env::{env_get, env_get_bool, env_get_opt};
use ringport_core::error::{Result, RingportError};
use ringport_core::rp_println;

/// How `async_write` grows an undersized write buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteGrowth {
    /// Grow to exactly the requested size.
    #[default]
    Exact,
    /// Grow to the next power of two at or above the requested size.
    Amortized,
}

impl WriteGrowth {
    /// New buffer length for a write of `needed` bytes into a buffer of
    /// `current` bytes. Never shrinks.
    pub fn grow(self, current: usize, needed: usize) -> usize {
        if needed <= current {
            return current;
        }
        match self {
            WriteGrowth::Exact => needed,
            WriteGrowth::Amortized => needed.checked_next_power_of_two().unwrap_or(needed),
        }
    }
}

impl FromStr for WriteGrowth {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(WriteGrowth::Exact),
            "amortized" | "pow2" => Ok(WriteGrowth::Amortized),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WriteGrowth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteGrowth::Exact => write!(f, "exact"),
            WriteGrowth::Amortized => write!(f, "amortized"),
        }
    }
}

/// Context configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Submission queue entries for the io_uring backend
    pub sq_entries: u32,
    /// Fixed read buffer per connection
    pub read_buffer_size: usize,
    /// Live + draining connections the slab will hold
    pub max_connections: usize,
    /// listen() backlog
    pub backlog: i32,
    /// Write buffer growth policy
    pub write_growth: WriteGrowth,
    /// Closures `Remote::post` can queue before `RemoteFull`
    pub remote_capacity: usize,
    /// TCP_NODELAY on accepted and connected sockets
    pub nodelay: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ContextConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `RINGPORT_SQ_ENTRIES` - io_uring submission queue size
    /// - `RINGPORT_READ_BUFFER_SIZE` - Per-connection read buffer
    /// - `RINGPORT_MAX_CONNECTIONS` - Slab capacity
    /// - `RINGPORT_BACKLOG` - listen() backlog
    /// - `RINGPORT_WRITE_GROWTH` - `exact` or `amortized`
    /// - `RINGPORT_REMOTE_CAPACITY` - Cross-thread command queue size
    /// - `RINGPORT_NODELAY` - TCP_NODELAY on new connections (0/1)
    pub fn from_env() -> Self {
        Self {
            sq_entries: env_get("RINGPORT_SQ_ENTRIES", defaults::SQ_ENTRIES),
            read_buffer_size: env_get("RINGPORT_READ_BUFFER_SIZE", defaults::READ_BUFFER_SIZE),
            max_connections: env_get("RINGPORT_MAX_CONNECTIONS", defaults::MAX_CONNECTIONS),
            backlog: env_get("RINGPORT_BACKLOG", defaults::BACKLOG),
            write_growth: env_get_opt("RINGPORT_WRITE_GROWTH").unwrap_or_default(),
            remote_capacity: env_get("RINGPORT_REMOTE_CAPACITY", defaults::REMOTE_CAPACITY),
            nodelay: env_get_bool("RINGPORT_NODELAY", defaults::NODELAY),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            sq_entries: defaults::SQ_ENTRIES,
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            max_connections: defaults::MAX_CONNECTIONS,
            backlog: defaults::BACKLOG,
            write_growth: WriteGrowth::Exact,
            remote_capacity: defaults::REMOTE_CAPACITY,
            nodelay: defaults::NODELAY,
        }
    }

    // Builder methods

    pub fn sq_entries(mut self, n: u32) -> Self {
        self.sq_entries = n;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    pub fn write_growth(mut self, growth: WriteGrowth) -> Self {
        self.write_growth = growth;
        self
    }

    pub fn remote_capacity(mut self, cap: usize) -> Self {
        self.remote_capacity = cap;
        self
    }

    pub fn nodelay(mut self, enable: bool) -> Self {
        self.nodelay = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.sq_entries == 0 || self.sq_entries > defaults::MAX_SQ_ENTRIES {
            return Err(RingportError::Config("sq_entries must be in 1..=32768"));
        }
        if self.read_buffer_size == 0 {
            return Err(RingportError::Config("read_buffer_size must be > 0"));
        }
        if self.read_buffer_size > u32::MAX as usize {
            return Err(RingportError::Config("read_buffer_size must fit in u32"));
        }
        if self.max_connections == 0 {
            return Err(RingportError::Config("max_connections must be > 0"));
        }
        // Slot index shares the token with kind and generation.
        if self.max_connections >= u32::MAX as usize {
            return Err(RingportError::Config("max_connections must be < u32::MAX"));
        }
        if self.backlog <= 0 {
            return Err(RingportError::Config("backlog must be > 0"));
        }
        if self.remote_capacity == 0 {
            return Err(RingportError::Config("remote_capacity must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        rp_println!("Ringport Configuration:");
        rp_println!("  sq_entries:        {}", self.sq_entries);
        rp_println!("  read_buffer_size:  {}", self.read_buffer_size);
        rp_println!("  max_connections:   {}", self.max_connections);
        rp_println!("  backlog:           {}", self.backlog);
        rp_println!("  write_growth:      {}", self.write_growth);
        rp_println!("  remote_capacity:   {}", self.remote_capacity);
        rp_println!("  nodelay:           {}", self.nodelay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ContextConfig::new();
        assert_eq!(config.read_buffer_size, defaults::READ_BUFFER_SIZE);
        assert_eq!(config.write_growth, WriteGrowth::Exact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ContextConfig::new()
            .read_buffer_size(64)
            .max_connections(8)
            .write_growth(WriteGrowth::Amortized)
            .nodelay(false);

        assert_eq!(config.read_buffer_size, 64);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.write_growth, WriteGrowth::Amortized);
        assert!(!config.nodelay);
    }

    #[test]
    fn test_validation() {
        assert!(ContextConfig::new().read_buffer_size(0).validate().is_err());
        assert!(ContextConfig::new().max_connections(0).validate().is_err());
        assert!(ContextConfig::new().sq_entries(0).validate().is_err());
        assert!(ContextConfig::new().backlog(0).validate().is_err());
        assert_eq!(
            ContextConfig::new().remote_capacity(0).validate(),
            Err(RingportError::Config("remote_capacity must be > 0"))
        );
    }

    #[test]
    fn test_write_growth() {
        assert_eq!(WriteGrowth::Exact.grow(4, 10), 10);
        assert_eq!(WriteGrowth::Amortized.grow(4, 10), 16);
        assert_eq!(WriteGrowth::Amortized.grow(0, 16), 16);
        // never shrinks
        assert_eq!(WriteGrowth::Exact.grow(32, 10), 32);
        assert_eq!(WriteGrowth::Amortized.grow(32, 10), 32);
    }

    #[test]
    fn test_write_growth_parse() {
        assert_eq!("exact".parse(), Ok(WriteGrowth::Exact));
        assert_eq!(" Amortized ".parse(), Ok(WriteGrowth::Amortized));
        assert!("doubling".parse::<WriteGrowth>().is_err());
    }
}
