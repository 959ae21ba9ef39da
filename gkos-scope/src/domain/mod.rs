//! Domain model for gkos-scope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern (a thread address is not a process address)
//! - Self-documenting function signatures
//! - Structured error handling, split by how far a failure is allowed to reach

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{CoreId, Deadline, ExecutionStatus, PriorityLevel, ProcessAddr, ThreadAddr};

pub use errors::{ConfigError, ExportError, ImageError, QueueError, ReadError, ReadResult};
