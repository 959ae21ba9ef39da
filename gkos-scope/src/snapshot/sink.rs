//! Host-provided output sink
//!
//! The host owns the actual table widget. The engine only ever talks to it
//! through [`ThreadSink`].

use crate::domain::ThreadAddr;

/// Table the snapshot rows are written into
pub trait ThreadSink {
    /// Drop all rows
    fn clear(&mut self);

    /// Define the column titles, in display order
    fn set_columns(&mut self, columns: &[&str]);

    /// Append one row; `thread` lets the host ask for its registers later
    fn add_row(&mut self, thread: ThreadAddr, cells: &[String]);

    /// Values of `column` the host should color, in legend order
    fn set_status_color_legend(&mut self, column: &str, values: &[String]);
}

/// Sink that keeps everything it is given
///
/// Used by the replay binary to print the table and by tests to inspect
/// what a host would have seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSink {
    pub columns: Vec<String>,
    pub rows: Vec<(ThreadAddr, Vec<String>)>,
    pub legend: Option<(String, Vec<String>)>,
    pub clear_count: usize,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell text of `row` in the column titled `title`
    #[must_use]
    pub fn cell(&self, row: usize, title: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == title)?;
        self.rows.get(row)?.1.get(index).map(String::as_str)
    }

    /// Row recorded for `thread`
    #[must_use]
    pub fn row_for(&self, thread: ThreadAddr) -> Option<usize> {
        self.rows.iter().position(|(t, _)| *t == thread)
    }

    /// Plain-text table with padded columns
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for (_, cells) in &self.rows {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, &width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = line(&self.columns);
        out.push('\n');
        for (_, cells) in &self.rows {
            out.push_str(&line(cells));
            out.push('\n');
        }
        out
    }
}

impl ThreadSink for RecordingSink {
    fn clear(&mut self) {
        self.rows.clear();
        self.clear_count += 1;
    }

    fn set_columns(&mut self, columns: &[&str]) {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
    }

    fn add_row(&mut self, thread: ThreadAddr, cells: &[String]) {
        self.rows.push((thread, cells.to_vec()));
    }

    fn set_status_color_legend(&mut self, column: &str, values: &[String]) {
        self.legend = Some((column.to_string(), values.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_lookup_and_table() {
        let mut sink = RecordingSink::new();
        sink.set_columns(&["ID", "Name"]);
        sink.add_row(ThreadAddr(0x10), &["10".to_string(), "idle".to_string()]);
        sink.add_row(ThreadAddr(0x20), &["20".to_string(), "net_rx".to_string()]);
        assert_eq!(sink.cell(1, "Name"), Some("net_rx"));
        assert_eq!(sink.cell(0, "Status"), None);
        assert_eq!(sink.row_for(ThreadAddr(0x20)), Some(1));
        assert_eq!(sink.render_table(), "ID  Name\n10  idle\n20  net_rx\n");

        sink.clear();
        assert!(sink.rows.is_empty());
        assert_eq!(sink.clear_count, 1);
    }
}
