//! # Target Memory Facade
//!
//! Everything the engine knows about the halted target comes through the
//! [`TargetMemory`] trait: raw word/byte reads, typed expression evaluation
//! against the target's debug information, and (for the optional runtime
//! counter reset only) a word write.
//!
//! ## Expressions
//!
//! Struct fields and globals are never addressed by hard-coded offsets.
//! Instead the engine builds an [`Expr`] and lets the host evaluate it with
//! the firmware's DWARF type information, so a kernel struct that grows a
//! field does not break the decoder:
//!
//! ```text
//! Expr::field_address("Thread", 0x38001000, "tss.r4")
//!   Display → &((Thread *)0x38001000)->tss.r4
//!
//! Expr::value("gk_nprio")
//!   Display → gk_nprio
//! ```
//!
//! A debugger host implements [`TargetMemory::evaluate`] by handing
//! `expr.to_string()` to its own evaluator. [`MemoryImage`] implements it
//! structurally over a recorded layout table instead.
//!
//! ## Module Structure
//!
//! - **`image`**: In-process target backed by a memory dump, symbol table and
//!   struct-layout table (JSON loadable)
//! - **`elf_symbols`**: Global symbol addresses from the firmware ELF
//! - **`synthetic`**: Builds consistent kernel images for demos and tests

pub mod elf_symbols;
pub mod image;
pub mod synthetic;

pub use image::{FieldLayout, MemoryImage, SymbolInfo, TypeLayout};

use std::fmt;

use crate::domain::{ReadError, ReadResult};

/// Read (and minimal write) access to a halted target
///
/// Every call is one bounded round trip. Failures are ordinary values: the
/// caller decides how far a missing value is allowed to propagate.
pub trait TargetMemory {
    /// Read a little-endian word of `width` bytes (1, 2, 4 or 8)
    ///
    /// # Errors
    /// Returns [`ReadError::Unavailable`] if any byte cannot be read
    fn read_word(&self, addr: u64, width: u64) -> ReadResult<u64>;

    /// Read `len` raw bytes
    ///
    /// # Errors
    /// Returns [`ReadError::Unavailable`] if any byte cannot be read
    fn read_bytes(&self, addr: u64, len: u64) -> ReadResult<Vec<u8>>;

    /// Evaluate a typed expression to an address or scalar value
    ///
    /// # Errors
    /// Returns [`ReadError::Unresolved`] for unknown symbols, types or
    /// fields, and [`ReadError::Unavailable`] when the value cannot be read
    fn evaluate(&self, expr: &Expr) -> ReadResult<u64>;

    /// Write a little-endian word; targets are read-only unless they opt in
    ///
    /// # Errors
    /// Returns [`ReadError::WriteRejected`] by default
    fn write_word(&mut self, addr: u64, width: u64, value: u64) -> ReadResult<()> {
        let _ = (width, value);
        Err(ReadError::WriteRejected { addr })
    }
}

/// Typed expression over the target's symbols and struct layouts
///
/// Paths are dot-separated member chains with optional `[index]` suffixes,
/// e.g. `tlist[3].v` or `name._M_dataplus._M_p`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Value of a global path, e.g. `gk_ncores`
    Value(String),
    /// Address of a global path, e.g. `&scheds[1]`
    AddressOf(String),
    /// Value of a member of the object at `base`
    Field { ty: &'static str, base: u64, path: String },
    /// Address of a member of the object at `base`
    FieldAddress { ty: &'static str, base: u64, path: String },
    /// Scalar width in bytes of a member of the object at `base`
    FieldSize { ty: &'static str, base: u64, path: String },
}

impl Expr {
    #[must_use]
    pub fn value(path: impl Into<String>) -> Self {
        Expr::Value(path.into())
    }

    #[must_use]
    pub fn address_of(path: impl Into<String>) -> Self {
        Expr::AddressOf(path.into())
    }

    #[must_use]
    pub fn field(ty: &'static str, base: u64, path: impl Into<String>) -> Self {
        Expr::Field { ty, base, path: path.into() }
    }

    #[must_use]
    pub fn field_address(ty: &'static str, base: u64, path: impl Into<String>) -> Self {
        Expr::FieldAddress { ty, base, path: path.into() }
    }

    #[must_use]
    pub fn field_size(ty: &'static str, base: u64, path: impl Into<String>) -> Self {
        Expr::FieldSize { ty, base, path: path.into() }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(path) => f.write_str(path),
            Expr::AddressOf(path) => write!(f, "&{path}"),
            Expr::Field { ty, base, path } => write!(f, "(({ty} *)0x{base:x})->{path}"),
            Expr::FieldAddress { ty, base, path } => write!(f, "&(({ty} *)0x{base:x})->{path}"),
            Expr::FieldSize { ty, base, path } => write!(f, "sizeof((({ty} *)0x{base:x})->{path})"),
        }
    }
}

/// One `name` or `name[index]` component of an expression path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment<'a> {
    pub name: &'a str,
    pub index: Option<u64>,
}

/// Split a path into its member segments
///
/// Returns `None` for empty segments or malformed indices.
#[must_use]
pub fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    path.split('.')
        .map(|segment| {
            if segment.is_empty() {
                return None;
            }
            match segment.find('[') {
                None => Some(PathSegment { name: segment, index: None }),
                Some(open) => {
                    let close = segment.strip_suffix(']')?;
                    let index = close[open + 1..].parse::<u64>().ok()?;
                    Some(PathSegment { name: &segment[..open], index: Some(index) })
                }
            }
        })
        .collect()
}
