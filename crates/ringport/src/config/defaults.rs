//! Library defaults for `ContextConfig`.

pub const SQ_ENTRIES: u32 = 256;
pub const MAX_SQ_ENTRIES: u32 = 32768;
pub const READ_BUFFER_SIZE: usize = 4096;
pub const MAX_CONNECTIONS: usize = 1024;
pub const BACKLOG: i32 = 1024;
pub const REMOTE_CAPACITY: usize = 1024;
pub const NODELAY: bool = true;
