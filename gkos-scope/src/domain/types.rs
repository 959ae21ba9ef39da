//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a process address
//! where a thread address is expected, and make function signatures more
//! expressive.

use serde::Serialize;
use std::fmt;

/// Address of a thread control block in target memory
///
/// This is the thread's identity. It is stable for as long as the kernel
/// thread lives, but an address seen in an earlier snapshot may have been
/// freed and reused since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ThreadAddr(pub u64);

impl ThreadAddr {
    /// Display identifier: address minus the kernel's id base
    ///
    /// Addresses below the base are shown unchanged.
    #[must_use]
    pub fn display_id(self, id_base: u64) -> u64 {
        self.0.checked_sub(id_base).unwrap_or(self.0)
    }
}

impl fmt::Display for ThreadAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Address of a process object in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessAddr(pub u64);

impl fmt::Display for ProcessAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// CPU core ID
///
/// Represents a CPU core ID (0, 1, ...) on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoreId(pub u32);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core {}", self.0)
    }
}

/// Index of the ready queue a thread was found in
///
/// This is the scheduler's array index, not necessarily the numeric
/// priority the thread was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PriorityLevel(pub u32);

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute wake-up time of a blocked thread, in the kernel's own units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Deadline {
    Millis(u64),
    Micros(u64),
    Timespec { secs: u64, nanos: u64 },
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Millis(ms) => write!(f, "{ms}ms"),
            Deadline::Micros(us) => write!(f, "{us}us"),
            Deadline::Timespec { secs, nanos } => write!(f, "{secs}.{nanos:09}s"),
        }
    }
}

/// Execution status of one thread within a snapshot
///
/// Exactly one status is assigned per thread. `Executing` wins over
/// everything else, then `Deleted`, then `Blocking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    Waiting,
    Executing(CoreId),
    Blocking,
    Deleted,
}

impl ExecutionStatus {
    /// Classify a thread from its current-thread match and its flags
    ///
    /// `current` holds the thread each core is running (if readable).
    #[must_use]
    pub fn classify(
        thread: ThreadAddr,
        current: &[(CoreId, Option<ThreadAddr>)],
        for_deletion: bool,
        is_blocking: bool,
    ) -> Self {
        if let Some((core, _)) = current.iter().find(|(_, t)| *t == Some(thread)) {
            ExecutionStatus::Executing(*core)
        } else if for_deletion {
            ExecutionStatus::Deleted
        } else if is_blocking {
            ExecutionStatus::Blocking
        } else {
            ExecutionStatus::Waiting
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Waiting => f.write_str("waiting"),
            ExecutionStatus::Executing(core) => write!(f, "exec core {}", core.0),
            ExecutionStatus::Blocking => f.write_str("blocking"),
            ExecutionStatus::Deleted => f.write_str("deleted"),
        }
    }
}
