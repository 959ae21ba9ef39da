//! In-process target backed by a recorded memory image
//!
//! A [`MemoryImage`] holds sparse memory regions, a symbol table and a
//! struct-layout table. It evaluates [`Expr`] paths structurally (symbol or
//! cast root, then one member at a time), which is enough to replay a dump
//! taken from a halted board or to run the engine against a synthetic kernel.
//!
//! ## Dump Format
//!
//! ```json
//! {
//!   "generation": "gkv4",
//!   "regions": [{ "address": 1073741824, "data": "00112233..." }],
//!   "symbols": { "sched": { "address": 1073745920, "ty": "Scheduler" } },
//!   "types": {
//!     "Thread": { "size": 512, "fields": { "is_blocking": { "offset": 96, "size": 1 } } }
//!   }
//! }
//! ```

use gkos_scope_common::KernelGeneration;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use super::{parse_path, Expr, TargetMemory};
use crate::domain::{ImageError, ReadError, ReadResult};

/// One member of a struct layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Byte offset from the start of the enclosing object
    pub offset: u64,
    /// Scalar width in bytes (0 for aggregates)
    #[serde(default)]
    pub size: u64,
    /// Nested type, for members that are themselves structs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// Element stride, for array members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<u64>,
}

/// Layout of one struct type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeLayout {
    pub size: u64,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldLayout>,
}

/// One global symbol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub address: u64,
    /// Scalar width in bytes for `Expr::Value` (0 for aggregates and code)
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionDump {
    address: u64,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageDump {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation: Option<KernelGeneration>,
    #[serde(default)]
    regions: Vec<RegionDump>,
    #[serde(default)]
    symbols: BTreeMap<String, SymbolInfo>,
    #[serde(default)]
    types: BTreeMap<String, TypeLayout>,
}

/// Sparse target memory with symbol and type information
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    generation: Option<KernelGeneration>,
    /// Non-overlapping regions keyed by base address
    regions: BTreeMap<u64, Vec<u8>>,
    symbols: BTreeMap<String, SymbolInfo>,
    types: BTreeMap<String, TypeLayout>,
    writes: usize,
}

/// Resolved location of an expression path
struct Location {
    addr: u64,
    ty: Option<String>,
    size: u64,
}

impl MemoryImage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel generation recorded in the dump header, if any
    #[must_use]
    pub fn generation(&self) -> Option<KernelGeneration> {
        self.generation
    }

    pub fn set_generation(&mut self, generation: KernelGeneration) {
        self.generation = Some(generation);
    }

    /// Number of writes the engine performed against this image
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Load a JSON dump
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed, a region is not valid hex,
    /// or a region runs past the top of the address space
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, ImageError> {
        let dump: ImageDump = serde_json::from_reader(reader)?;
        let mut image = MemoryImage {
            generation: dump.generation,
            symbols: dump.symbols,
            types: dump.types,
            ..MemoryImage::default()
        };
        for region in dump.regions {
            let data = hex::decode(region.data.trim())
                .map_err(|source| ImageError::Hex { address: region.address, source })?;
            if !image.write_bytes(region.address, &data) {
                let len = data.len() as u64;
                return Err(ImageError::RegionOverflow { address: region.address, len });
            }
        }
        debug!(
            "Loaded memory image: {} regions, {} symbols, {} types",
            image.regions.len(),
            image.symbols.len(),
            image.types.len()
        );
        Ok(image)
    }

    /// Load a JSON dump from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let file = std::fs::File::open(path)?;
        Self::from_json_reader(std::io::BufReader::new(file))
    }

    /// Write the image as a JSON dump
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn to_json_writer<W: Write>(&self, writer: W) -> Result<(), ImageError> {
        let dump = ImageDump {
            generation: self.generation,
            regions: self
                .regions
                .iter()
                .map(|(address, data)| RegionDump { address: *address, data: hex::encode(data) })
                .collect(),
            symbols: self.symbols.clone(),
            types: self.types.clone(),
        };
        serde_json::to_writer_pretty(writer, &dump)?;
        Ok(())
    }

    pub fn define_symbol(&mut self, name: impl Into<String>, info: SymbolInfo) {
        self.symbols.insert(name.into(), info);
    }

    /// Add symbols found elsewhere (e.g. the ELF) without losing known types
    pub fn merge_symbols<I>(&mut self, symbols: I) -> usize
    where
        I: IntoIterator<Item = (String, SymbolInfo)>,
    {
        let mut added = 0;
        for (name, info) in symbols {
            match self.symbols.get_mut(&name) {
                Some(existing) => existing.address = info.address,
                None => {
                    self.symbols.insert(name, info);
                    added += 1;
                }
            }
        }
        added
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    pub fn define_type(&mut self, name: impl Into<String>, layout: TypeLayout) {
        self.types.insert(name.into(), layout);
    }

    /// Layout of `name`, created empty if missing
    pub fn type_mut(&mut self, name: &str) -> &mut TypeLayout {
        self.types.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn type_layout(&self, name: &str) -> Option<&TypeLayout> {
        self.types.get(name)
    }

    /// Store bytes, merging with any region they touch
    ///
    /// Returns `false`, storing nothing, if the bytes would run past the top
    /// of the address space.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let Some(end) = addr.checked_add(data.len() as u64) else {
            debug!("Dropping {} byte(s) at 0x{addr:x}: past the end of memory", data.len());
            return false;
        };
        let touching: Vec<u64> = self
            .regions
            .range(..=end)
            .filter(|(base, bytes)| base.saturating_add(bytes.len() as u64) >= addr)
            .map(|(base, _)| *base)
            .collect();

        let mut start = addr;
        let mut stop = end;
        for base in &touching {
            let len = self.regions.get(base).map_or(0, Vec::len) as u64;
            start = start.min(*base);
            stop = stop.max(base.saturating_add(len));
        }
        let Ok(size) = usize::try_from(stop - start) else {
            return false;
        };

        let mut merged = vec![0u8; size];
        for base in touching {
            if let Some(bytes) = self.regions.remove(&base) {
                let at = usize::try_from(base - start).unwrap_or(0);
                merged[at..at + bytes.len()].copy_from_slice(&bytes);
            }
        }
        let at = usize::try_from(addr - start).unwrap_or(0);
        merged[at..at + data.len()].copy_from_slice(data);
        self.regions.insert(start, merged);
        true
    }

    /// Store a little-endian word of `width` bytes
    pub fn write_le(&mut self, addr: u64, width: u64, value: u64) {
        let width = usize::try_from(width.min(8)).unwrap_or(8);
        self.write_bytes(addr, &value.to_le_bytes()[..width]);
    }

    fn slice(&self, addr: u64, len: u64) -> Option<&[u8]> {
        let (base, bytes) = self.regions.range(..=addr).next_back()?;
        let from = usize::try_from(addr - base).ok()?;
        let to = from.checked_add(usize::try_from(len).ok()?)?;
        bytes.get(from..to)
    }

    fn locate(&self, expr: &Expr) -> ReadResult<Location> {
        let unresolved = || ReadError::Unresolved(expr.to_string());
        let (mut loc, path) = match expr {
            Expr::Value(path) | Expr::AddressOf(path) => {
                let segments = parse_path(path).ok_or_else(unresolved)?;
                let (first, rest) = segments.split_first().ok_or_else(unresolved)?;
                let symbol = self.symbols.get(first.name).ok_or_else(unresolved)?;
                let mut loc =
                    Location { addr: symbol.address, ty: symbol.ty.clone(), size: symbol.size };
                if let Some(index) = first.index {
                    let stride = loc
                        .ty
                        .as_deref()
                        .and_then(|ty| self.types.get(ty))
                        .map(|t| t.size)
                        .ok_or_else(unresolved)?;
                    loc.addr = loc.addr.wrapping_add(index.wrapping_mul(stride));
                }
                (loc, rest.to_vec())
            }
            Expr::Field { ty, base, path }
            | Expr::FieldAddress { ty, base, path }
            | Expr::FieldSize { ty, base, path } => {
                let segments = parse_path(path).ok_or_else(unresolved)?;
                (Location { addr: *base, ty: Some((*ty).to_string()), size: 0 }, segments)
            }
        };

        for segment in path {
            let layout =
                loc.ty.as_deref().and_then(|ty| self.types.get(ty)).ok_or_else(unresolved)?;
            let field = layout.fields.get(segment.name).ok_or_else(unresolved)?;
            loc.addr = loc.addr.wrapping_add(field.offset);
            if let Some(index) = segment.index {
                let stride = field
                    .stride
                    .or_else(|| {
                        field.ty.as_deref().and_then(|ty| self.types.get(ty)).map(|t| t.size)
                    })
                    .ok_or_else(unresolved)?;
                loc.addr = loc.addr.wrapping_add(index.wrapping_mul(stride));
            }
            loc.ty.clone_from(&field.ty);
            loc.size = field.size;
        }
        Ok(loc)
    }
}

impl TargetMemory for MemoryImage {
    fn read_word(&self, addr: u64, width: u64) -> ReadResult<u64> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(ReadError::Unavailable { addr, len: width });
        }
        let bytes = self.slice(addr, width).ok_or(ReadError::Unavailable { addr, len: width })?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bytes(&self, addr: u64, len: u64) -> ReadResult<Vec<u8>> {
        self.slice(addr, len).map(<[u8]>::to_vec).ok_or(ReadError::Unavailable { addr, len })
    }

    fn evaluate(&self, expr: &Expr) -> ReadResult<u64> {
        let loc = self.locate(expr)?;
        match expr {
            Expr::AddressOf(_) | Expr::FieldAddress { .. } => Ok(loc.addr),
            Expr::Value(_) | Expr::Field { .. } | Expr::FieldSize { .. } if loc.size == 0 => {
                Err(ReadError::Unresolved(expr.to_string()))
            }
            Expr::FieldSize { .. } => Ok(loc.size),
            Expr::Value(_) | Expr::Field { .. } => self.read_word(loc.addr, loc.size),
        }
    }

    fn write_word(&mut self, addr: u64, width: u64, value: u64) -> ReadResult<()> {
        if !matches!(width, 1 | 2 | 4 | 8) || self.slice(addr, width).is_none() {
            return Err(ReadError::WriteRejected { addr });
        }
        self.write_le(addr, width, value);
        self.writes += 1;
        Ok(())
    }
}
