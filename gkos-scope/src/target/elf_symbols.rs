//! Global symbol addresses from the firmware ELF
//!
//! A memory dump usually carries only the symbols the dumper was asked for.
//! Merging the firmware's symbol table fills in the rest (`Yield`,
//! `gk_ncores`, ...) so topology probing and context-switch lookup work
//! without re-dumping.

use log::info;
use object::{Object, ObjectSymbol, SymbolKind};
use std::path::Path;

use super::SymbolInfo;
use crate::domain::ImageError;

/// Read defined data and text symbols from an ELF file
///
/// Data symbols of 1, 2, 4 or 8 bytes keep their size so `Expr::Value`
/// can read them; everything else is address-only.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a parseable object
pub fn load_elf_symbols(path: impl AsRef<Path>) -> Result<Vec<(String, SymbolInfo)>, ImageError> {
    let data = std::fs::read(path.as_ref())?;
    let symbols = parse_elf_symbols(&data)?;
    info!("Loaded {} symbols from {}", symbols.len(), path.as_ref().display());
    Ok(symbols)
}

/// Parse symbols from an in-memory ELF image
///
/// # Errors
/// Returns an error if the data is not a parseable object file
pub fn parse_elf_symbols(data: &[u8]) -> Result<Vec<(String, SymbolInfo)>, ImageError> {
    let file = object::File::parse(data).map_err(|e| ImageError::Elf(e.to_string()))?;

    let symbols = file
        .symbols()
        .filter(|sym| sym.is_definition())
        .filter(|sym| matches!(sym.kind(), SymbolKind::Data | SymbolKind::Text))
        .filter_map(|sym| {
            let name = sym.name().ok()?;
            if name.is_empty() {
                return None;
            }
            let size = match (sym.kind(), sym.size()) {
                (SymbolKind::Data, size @ (1 | 2 | 4 | 8)) => size,
                _ => 0,
            };
            Some((name.to_string(), SymbolInfo { address: sym.address(), size, ty: None }))
        })
        .collect();

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_symbols_from_own_executable() {
        // The test harness binary is an ELF with a regular symbol table
        let exe = std::env::current_exe().expect("Failed to get current exe");
        let symbols = load_elf_symbols(&exe).expect("Failed to parse own executable");
        assert!(!symbols.is_empty());
        assert!(symbols.iter().all(|(name, _)| !name.is_empty()));
    }

    #[test]
    fn test_non_elf_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an object file").unwrap();
        let err = load_elf_symbols(file.path()).unwrap_err();
        assert!(matches!(err, ImageError::Elf(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_elf_symbols("/nonexistent/firmware.elf").unwrap_err();
        assert!(matches!(err, ImageError::Io(_)));
    }
}
