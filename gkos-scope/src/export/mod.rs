//! Snapshot export
//!
//! Collects the snapshots of one session and writes them as a single JSON
//! document, for diffing two runs or for feeding another tool:
//!
//! ```text
//! {
//!   "os": "gkos",
//!   "generation": "gkv4",
//!   "snapshots": [ { "topology": "smp-shared", "rows": [...], "stats": {...} } ]
//! }
//! ```
//!
//! Unreadable values are exported as `null`, not as display sentinels.

use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ExportError;
use crate::snapshot::Snapshot;

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    os: &'static str,
    generation: Option<gkos_scope_common::KernelGeneration>,
    snapshots: &'a [Snapshot],
}

/// Accumulates snapshots until they are written out
#[derive(Debug, Default)]
pub struct SnapshotExporter {
    snapshots: Vec<Snapshot>,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Write all collected snapshots to any writer
    ///
    /// # Errors
    /// Returns [`ExportError::Json`] if serialization or the underlying
    /// write fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let document = ExportDocument {
            os: self.snapshots.first().map_or("gkos", |s| s.os),
            generation: self.snapshots.first().map(|s| s.generation),
            snapshots: &self.snapshots,
        };
        serde_json::to_writer_pretty(writer, &document)?;
        Ok(())
    }

    /// Write all collected snapshots to a new file at `path`
    ///
    /// # Errors
    /// Returns [`ExportError::Io`] if the file cannot be created and
    /// [`ExportError::WriteFailed`] if it cannot be flushed
    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.export(&mut writer)?;
        writer.flush().map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
        info!("Exported {} snapshot(s) to {}", self.snapshots.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_export_is_valid_json() {
        let exporter = SnapshotExporter::new();
        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["os"], "gkos");
        assert!(value["generation"].is_null());
        assert_eq!(value["snapshots"].as_array().map(Vec::len), Some(0));
    }
}
