//! One decoded thread and its rendering into table cells
//!
//! Rows keep every decoded value as an `Option` so the JSON export can tell
//! "unreadable" from "zero". Substitution with display sentinels happens
//! only in [`ThreadRow::cell`].

use serde::Serialize;
use std::fmt;

use crate::domain::{CoreId, ExecutionStatus, PriorityLevel, ThreadAddr};
use crate::introspection::{BlockReason, RuntimeFigure};

/// Placeholder for names that could not be read
pub const UNDEFINED: &str = "undefined";

/// Output column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Column {
    Id,
    Name,
    Process,
    Priority,
    /// Owning scheduler's core, per-core topologies only
    Core,
    Pc,
    Status,
    BlockingOn,
    Stack,
    Runtime,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Id,
        Column::Name,
        Column::Process,
        Column::Priority,
        Column::Core,
        Column::Pc,
        Column::Status,
        Column::BlockingOn,
        Column::Stack,
        Column::Runtime,
    ];

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::Name => "Name",
            Column::Process => "Process",
            Column::Priority => "Priority",
            Column::Core => "Core",
            Column::Pc => "PC",
            Column::Status => "Status",
            Column::BlockingOn => "BlockingOn",
            Column::Stack => "Stack",
            Column::Runtime => "Runtime",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Stack bounds and current position of a thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackRegion {
    pub base: Option<u64>,
    pub length: Option<u64>,
    pub sp: Option<u64>,
}

impl StackRegion {
    /// One past the highest stack address
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        Some(self.base?.wrapping_add(self.length?))
    }

    /// Whether the stack pointer lies inside `[base, end]`
    ///
    /// `None` if any of the three values is unknown.
    #[must_use]
    pub fn contains_sp(&self) -> Option<bool> {
        let (base, end, sp) = (self.base?, self.end()?, self.sp?);
        Some((base..=end).contains(&sp))
    }
}

impl fmt::Display for StackRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x} ({:x}-{:x})",
            self.sp.unwrap_or(0),
            self.base.unwrap_or(0),
            self.end().unwrap_or(0)
        )
    }
}

/// A single thread in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadRow {
    pub thread: ThreadAddr,
    /// Thread address minus the kernel's id base
    pub id: u64,
    pub name: Option<String>,
    pub process: Option<String>,
    pub priority: PriorityLevel,
    /// Core of the scheduler instance the thread was found in
    pub core: Option<CoreId>,
    pub status: ExecutionStatus,
    pub pc: Option<u64>,
    /// `None` when the blocking flag itself was unreadable
    pub blocking: Option<BlockReason>,
    /// `blocking` rendered within the chain budget
    pub blocking_on: String,
    pub stack: StackRegion,
    pub runtime: Option<RuntimeFigure>,
}

impl ThreadRow {
    /// Display text of one column, with sentinels for unreadable values
    #[must_use]
    pub fn cell(&self, column: Column) -> String {
        match column {
            Column::Id => format!("{:x}", self.id),
            Column::Name => self.name.clone().unwrap_or_else(|| UNDEFINED.to_string()),
            Column::Process => match &self.process {
                Some(name) if !name.is_empty() => name.clone(),
                _ => UNDEFINED.to_string(),
            },
            Column::Priority => self.priority.to_string(),
            Column::Core => self.core.map(|core| core.0.to_string()).unwrap_or_default(),
            Column::Pc => format!("{:x}", self.pc.unwrap_or(0)),
            Column::Status => self.status.to_string(),
            Column::BlockingOn => self.blocking_on.clone(),
            Column::Stack => self.stack.to_string(),
            Column::Runtime => self.runtime.map(|r| r.to_string()).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn cells(&self, columns: &[Column]) -> Vec<String> {
        columns.iter().map(|&column| self.cell(column)).collect()
    }
}
