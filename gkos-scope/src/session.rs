//! # Host Session
//!
//! The surface a debugger host drives:
//!
//! - [`Session::init`]: probe the topology, set up columns and the status legend
//! - [`Session::update`]: one snapshot into the host's sink
//! - [`Session::os_name`]: static kernel identifier
//! - [`Session::context_switch_entry_points`]: addresses the host's unwinder
//!   should treat as context-switch glue
//! - [`Session::thread_registers`]: full register file of one listed thread
//!
//! Everything probed at init lives in an immutable [`SessionContext`]. The
//! only value carried from one update to the next is the previous elapsed
//! time, needed for the reset-on-read runtime window.

use gkos_scope_common::{KernelGeneration, KernelLayout, DEFAULT_CHAIN_BUDGET};
use log::{info, warn};

use crate::domain::{ConfigError, ThreadAddr};
use crate::introspection::{
    ContextReconstructor, ElapsedSource, FrameTable, RuntimeAggregator, RuntimeMode, Topology,
};
use crate::snapshot::{Column, Snapshot, SnapshotBuilder, ThreadSink};
use crate::target::{Expr, TargetMemory};

/// Session options chosen by the host or the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub generation: KernelGeneration,
    pub runtime_mode: RuntimeMode,
    /// Character budget for rendered wait chains
    pub chain_budget: usize,
    /// Replaces the generation's own elapsed-time counter
    pub elapsed: Option<ElapsedSource>,
    /// Replaces the generation's thread id base
    pub id_base: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation: KernelGeneration::default(),
            runtime_mode: RuntimeMode::default(),
            chain_budget: DEFAULT_CHAIN_BUDGET,
            elapsed: None,
            id_base: None,
        }
    }
}

/// Configuration resolved at init, read-only afterwards
pub struct SessionContext {
    layout: &'static KernelLayout,
    topology: Topology,
    columns: Vec<Column>,
    chain_budget: usize,
    id_base: u64,
    runtime_mode: RuntimeMode,
    elapsed: Option<ElapsedSource>,
    reconstructor: Box<dyn ContextReconstructor + Send + Sync>,
}

impl SessionContext {
    /// Resolve the topology and derive everything else from `config`
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the scheduler topology cannot be determined
    pub fn resolve(memory: &dyn TargetMemory, config: &SessionConfig) -> Result<Self, ConfigError> {
        let layout = config.generation.layout();
        let topology = Topology::probe(memory, layout)?;
        let columns = topology.columns();
        let elapsed = config.elapsed.clone().or_else(|| ElapsedSource::for_layout(layout));
        Ok(Self {
            layout,
            topology,
            columns,
            chain_budget: config.chain_budget,
            id_base: config.id_base.unwrap_or(layout.id_base),
            runtime_mode: config.runtime_mode,
            elapsed,
            reconstructor: Box::new(FrameTable::new(layout)),
        })
    }

    #[must_use]
    pub fn layout(&self) -> &'static KernelLayout {
        self.layout
    }

    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn chain_budget(&self) -> usize {
        self.chain_budget
    }

    #[must_use]
    pub fn id_base(&self) -> u64 {
        self.id_base
    }

    #[must_use]
    pub fn runtime_mode(&self) -> RuntimeMode {
        self.runtime_mode
    }

    #[must_use]
    pub fn elapsed_source(&self) -> Option<&ElapsedSource> {
        self.elapsed.as_ref()
    }

    #[must_use]
    pub fn reconstructor(&self) -> &dyn ContextReconstructor {
        self.reconstructor.as_ref()
    }
}

/// A debugging session against one target
pub struct Session<M: TargetMemory> {
    memory: M,
    context: SessionContext,
    previous_elapsed: Option<u64>,
}

impl<M: TargetMemory> Session<M> {
    /// Probe the target and configure the host's table
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the scheduler topology cannot be
    /// determined; the sink is left untouched in that case
    pub fn init(
        memory: M,
        config: &SessionConfig,
        sink: &mut dyn ThreadSink,
    ) -> Result<Self, ConfigError> {
        let context = SessionContext::resolve(&memory, config)?;
        info!(
            "{} session: {} generation, {} column(s), runtime {:?}",
            context.layout.os_name,
            context.layout.generation,
            context.columns.len(),
            context.runtime_mode
        );

        let titles: Vec<&str> = context.columns.iter().map(|c| c.title()).collect();
        sink.clear();
        sink.set_columns(&titles);
        sink.set_status_color_legend(Column::Status.title(), &context.topology.status_legend());

        Ok(Self { memory, context, previous_elapsed: None })
    }

    /// Swap the register reconstructor, e.g. for a kernel with a custom frame
    #[must_use]
    pub fn with_reconstructor(
        mut self,
        reconstructor: Box<dyn ContextReconstructor + Send + Sync>,
    ) -> Self {
        self.context.reconstructor = reconstructor;
        self
    }

    /// Produce one snapshot and repopulate the sink with it
    pub fn update(&mut self, sink: &mut dyn ThreadSink) -> Snapshot {
        let elapsed = self.context.elapsed.as_ref().and_then(|source| {
            source
                .read(&self.memory)
                .map_err(|e| warn!("Elapsed-time counter unavailable, raw runtimes only: {e}"))
                .ok()
        });

        let window = match (self.context.runtime_mode, elapsed, self.previous_elapsed) {
            (RuntimeMode::ResetOnRead, Some(now), Some(previous)) => {
                Some(now.saturating_sub(previous))
            }
            (_, elapsed, _) => elapsed,
        };
        self.previous_elapsed = elapsed;

        let runtime =
            RuntimeAggregator::new(self.context.layout, self.context.runtime_mode, window);
        let snapshot = SnapshotBuilder::new(&self.context, runtime).build(&mut self.memory);
        snapshot.emit(sink);
        snapshot
    }

    #[must_use]
    pub fn os_name(&self) -> &'static str {
        self.context.layout.os_name
    }

    /// Addresses of the kernel's context-switch routines; empty if none resolve
    #[must_use]
    pub fn context_switch_entry_points(&self) -> Vec<u64> {
        self.context
            .layout
            .context_switch_symbols
            .iter()
            .filter_map(|symbol| self.memory.evaluate(&Expr::address_of(*symbol)).ok())
            .collect()
    }

    /// Register file of a thread, unreadable registers as zero
    #[must_use]
    pub fn thread_registers(&self, thread: ThreadAddr) -> Vec<u64> {
        self.context.reconstructor.reconstruct(&self.memory, thread).to_values()
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    #[must_use]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The target, e.g. to let it run between updates
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }
}
