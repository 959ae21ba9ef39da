//! Structured error types for gkos-scope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! The types are split by blast radius: a [`ReadError`] costs one field, a
//! [`QueueError`] one priority level, and only a [`ConfigError`] stops a
//! session.

use thiserror::Error;

/// A single memory or symbol read that the target could not satisfy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("{len} bytes at 0x{addr:x} are unavailable")]
    Unavailable { addr: u64, len: u64 },

    #[error("expression `{0}` could not be evaluated")]
    Unresolved(String),

    #[error("target rejected write to 0x{addr:x}")]
    WriteRejected { addr: u64 },

    #[error("string at 0x{addr:x} claims implausible length {len}")]
    ImplausibleLength { addr: u64, len: u64 },
}

/// Result of one read against the target
pub type ReadResult<T> = Result<T, ReadError>;

/// Scheduler topology could not be established; the session cannot start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no scheduler symbol resolved (tried {})", .tried.join(", "))]
    SchedulerNotFound { tried: Vec<String> },

    #[error("scheduler instance `{symbol}[{index}]` could not be resolved")]
    SchedulerInstanceUnresolved { symbol: String, index: u32 },

    #[error("`{symbol}` reports implausible {what} {value}")]
    ImplausibleCount { symbol: String, what: &'static str, value: u64 },
}

/// A ready queue that cannot be walked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("ready queue {level} ends before it starts (0x{start:x}..0x{end:x})")]
    Inverted { level: u32, start: u64, end: u64 },

    #[error("ready queue {level} claims {slots} slots")]
    Oversized { level: u32, slots: u64 },

    #[error("ready queue {level} is unreadable: {source}")]
    Unreadable {
        level: u32,
        #[source]
        source: ReadError,
    },
}

/// Loading a memory dump or symbol file failed
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to parse memory dump: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Region at 0x{address:x} has invalid hex data: {source}")]
    Hex {
        address: u64,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Region at 0x{address:x} ({len} bytes) runs past the end of the address space")]
    RegionOverflow { address: u64, len: u64 },

    #[error("Failed to parse ELF file: {0}")]
    Elf(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write snapshot file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
