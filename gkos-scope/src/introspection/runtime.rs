//! Runtime Aggregator
//!
//! Turns each thread's busy-time counter into `busy / percent`, where the
//! percentage is taken against the global elapsed-time counter. Without an
//! elapsed counter only the raw figure is shown.
//!
//! In [`RuntimeMode::ResetOnRead`] every counter is zeroed after it is read,
//! so each snapshot shows time spent since the previous one and the
//! percentage is taken against the elapsed time between the two snapshots.

use gkos_scope_common::{KernelLayout, TimeUnit};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{ReadResult, ThreadAddr};
use crate::target::{Expr, TargetMemory};

/// How per-thread busy counters are treated, fixed for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    /// Counters accumulate since boot
    #[default]
    Cumulative,
    /// Counters are zeroed after each snapshot
    ResetOnRead,
}

/// Where the global elapsed-time counter lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElapsedSource {
    /// Scalar global, multiplied by `scale` to reach busy-time units
    Symbol { name: String, scale: u64 },
    /// Raw counter register or memory word
    Address { address: u64, width: u64, scale: u64 },
}

impl ElapsedSource {
    /// The generation's own elapsed counter, if it has one
    #[must_use]
    pub fn for_layout(layout: &KernelLayout) -> Option<Self> {
        layout.elapsed.map(|counter| ElapsedSource::Symbol {
            name: counter.symbol.to_string(),
            scale: counter.scale,
        })
    }

    /// Current counter value in busy-time units
    ///
    /// # Errors
    /// Returns the facade's error if the counter cannot be read
    pub fn read(&self, memory: &dyn TargetMemory) -> ReadResult<u64> {
        match self {
            ElapsedSource::Symbol { name, scale } => {
                memory.evaluate(&Expr::value(name.as_str())).map(|v| v.saturating_mul(*scale))
            }
            ElapsedSource::Address { address, width, scale } => {
                memory.read_word(*address, *width).map(|v| v.saturating_mul(*scale))
            }
        }
    }
}

/// One thread's runtime cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuntimeFigure {
    pub busy: u64,
    #[serde(skip)]
    pub unit: TimeUnit,
    /// Share of elapsed time, when the elapsed counter is known
    pub percent: Option<f64>,
}

impl fmt::Display for RuntimeFigure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent {
            Some(percent) => write!(f, "{} / {percent:.2}%", self.busy),
            None => write!(f, "{}", self.busy),
        }
    }
}

/// Reads (and optionally resets) busy counters for one snapshot
#[derive(Debug, Clone, Copy)]
pub struct RuntimeAggregator {
    mode: RuntimeMode,
    busy_field: &'static str,
    thread_type: &'static str,
    unit: TimeUnit,
    /// Elapsed time the percentages are taken against
    window: Option<u64>,
}

impl RuntimeAggregator {
    #[must_use]
    pub fn new(layout: &'static KernelLayout, mode: RuntimeMode, window: Option<u64>) -> Self {
        Self {
            mode,
            busy_field: layout.thread.busy_time,
            thread_type: layout.thread.type_name,
            unit: layout.thread.busy_time_unit,
            window,
        }
    }

    #[must_use]
    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    #[must_use]
    pub fn window(&self) -> Option<u64> {
        self.window
    }

    /// Figure for a raw busy value against this snapshot's window
    #[must_use]
    pub fn figure(&self, busy: u64) -> RuntimeFigure {
        #[allow(clippy::cast_precision_loss)]
        let percent = self.window.filter(|&w| w > 0).map(|w| busy as f64 * 100.0 / w as f64);
        RuntimeFigure { busy, unit: self.unit, percent }
    }

    /// Read one thread's counter, resetting it in [`RuntimeMode::ResetOnRead`]
    ///
    /// Returns the figure and whether a requested reset failed.
    ///
    /// # Errors
    /// Returns the facade's error if the counter cannot be read
    pub fn read(
        &self,
        memory: &mut dyn TargetMemory,
        thread: ThreadAddr,
    ) -> ReadResult<(RuntimeFigure, bool)> {
        let busy = memory.evaluate(&Expr::field(self.thread_type, thread.0, self.busy_field))?;
        let mut reset_failed = false;
        if self.mode == RuntimeMode::ResetOnRead {
            if let Err(e) = self.reset(memory, thread) {
                debug!("Could not reset busy counter of thread {thread}: {e}");
                reset_failed = true;
            }
        }
        Ok((self.figure(busy), reset_failed))
    }

    /// Zero exactly the counter's own bytes
    fn reset(&self, memory: &mut dyn TargetMemory, thread: ThreadAddr) -> ReadResult<()> {
        let (ty, base, path) = (self.thread_type, thread.0, self.busy_field);
        let addr = memory.evaluate(&Expr::field_address(ty, base, path))?;
        let width = memory.evaluate(&Expr::field_size(ty, base, path))?;
        memory.write_word(addr, width, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{FieldLayout, MemoryImage, SymbolInfo, TypeLayout};
    use gkos_scope_common::{GKV3_LAYOUT, GKV4_LAYOUT};

    const THREAD: u64 = 0x2000_1000;

    fn image_with_counter(busy: u64) -> MemoryImage {
        let mut image = MemoryImage::new();
        let mut thread = TypeLayout { size: 0x40, ..TypeLayout::default() };
        let counter = FieldLayout { offset: 0x10, size: 8, ..FieldLayout::default() };
        thread.fields.insert("total_us_time".into(), counter);
        image.define_type("Thread", thread);
        image.write_bytes(THREAD, &[0u8; 0x40]);
        image.write_le(THREAD + 0x10, 8, busy);
        image
    }

    #[test]
    fn test_quarter_of_elapsed_renders_percentage() {
        let mut image = image_with_counter(250);
        let aggregator = RuntimeAggregator::new(&GKV4_LAYOUT, RuntimeMode::Cumulative, Some(1000));
        let (figure, reset_failed) = aggregator.read(&mut image, ThreadAddr(THREAD)).unwrap();
        assert_eq!(figure.to_string(), "250 / 25.00%");
        assert!(!reset_failed);
        assert_eq!(image.write_count(), 0);
    }

    #[test]
    fn test_missing_elapsed_keeps_raw_figure() {
        let aggregator = RuntimeAggregator::new(&GKV4_LAYOUT, RuntimeMode::Cumulative, None);
        assert_eq!(aggregator.figure(250).to_string(), "250");
        let zero_window = RuntimeAggregator::new(&GKV4_LAYOUT, RuntimeMode::Cumulative, Some(0));
        assert_eq!(zero_window.figure(250).percent, None);
    }

    #[test]
    fn test_reset_on_read_zeroes_counter() {
        let mut image = image_with_counter(400);
        let aggregator = RuntimeAggregator::new(&GKV4_LAYOUT, RuntimeMode::ResetOnRead, Some(800));
        let (figure, _) = aggregator.read(&mut image, ThreadAddr(THREAD)).unwrap();
        assert_eq!(figure.to_string(), "400 / 50.00%");
        assert_eq!(image.read_word(THREAD + 0x10, 8), Ok(0));
        assert_eq!(image.write_count(), 1);
    }

    #[test]
    fn test_reset_leaves_neighbouring_field_alone() {
        let mut image = MemoryImage::new();
        let mut thread = TypeLayout { size: 0x40, ..TypeLayout::default() };
        let counter = FieldLayout { offset: 0x10, size: 4, ..FieldLayout::default() };
        let neighbour = FieldLayout { offset: 0x14, size: 4, ..FieldLayout::default() };
        thread.fields.insert("total_us_time".into(), counter);
        thread.fields.insert("neighbour".into(), neighbour);
        image.define_type("Thread", thread);
        image.write_bytes(THREAD, &[0u8; 0x40]);
        image.write_le(THREAD + 0x10, 4, 300);
        image.write_le(THREAD + 0x14, 4, 0xCAFE);

        let aggregator = RuntimeAggregator::new(&GKV4_LAYOUT, RuntimeMode::ResetOnRead, None);
        let (figure, reset_failed) = aggregator.read(&mut image, ThreadAddr(THREAD)).unwrap();
        assert_eq!(figure.busy, 300);
        assert!(!reset_failed);
        assert_eq!(image.read_word(THREAD + 0x10, 4), Ok(0));
        assert_eq!(image.evaluate(&Expr::field("Thread", THREAD, "neighbour")), Ok(0xCAFE));
    }

    #[test]
    fn test_elapsed_symbol_is_scaled() {
        let mut image = MemoryImage::new();
        image.define_symbol("_cur_ms", SymbolInfo { address: 0x100, size: 8, ty: None });
        image.write_le(0x100, 8, 42);
        let source = ElapsedSource::for_layout(&GKV3_LAYOUT).unwrap();
        assert_eq!(source.read(&image), Ok(42_000));
        assert!(ElapsedSource::for_layout(&GKV4_LAYOUT).is_none());
    }

    #[test]
    fn test_elapsed_address_source() {
        let mut image = MemoryImage::new();
        image.write_le(0x5800_4500, 8, 7);
        let source = ElapsedSource::Address { address: 0x5800_4500, width: 8, scale: 1000 };
        assert_eq!(source.read(&image), Ok(7000));
    }
}
