//! # Snapshot Builder
//!
//! One pass over the target, producing one [`ThreadRow`] per thread found in
//! any ready queue:
//!
//! ```text
//! for each scheduler instance ─▶ read current_thread slots
//! for each instance, level    ─▶ ReadyQueue::read ─▶ slots
//! for each slot               ─▶ status, name, process, registers,
//!                                stack, wait chain, runtime ─▶ ThreadRow
//! ```
//!
//! ## Failure Containment
//!
//! - A field that cannot be read leaves a `None` in its row
//! - A slot that cannot be read is skipped and counted
//! - A malformed queue drops that priority level only
//!
//! Nothing here returns an error: the worst case is an empty snapshot with
//! the reasons counted in [`SnapshotStats`] and logged.

pub mod row;
pub mod sink;

pub use row::{Column, StackRegion, ThreadRow, UNDEFINED};
pub use sink::{RecordingSink, ThreadSink};

use gkos_scope_common::KernelGeneration;
use log::{debug, warn};
use serde::Serialize;

use crate::domain::{CoreId, ExecutionStatus, PriorityLevel, ThreadAddr};
use crate::introspection::fields::indexed;
use crate::introspection::{
    BlockingResolver, FieldReader, ReadyQueue, RuntimeAggregator, SchedulerInstance,
    SchedulerTopology,
};
use crate::session::SessionContext;
use crate::target::TargetMemory;

/// Counters describing how complete a snapshot is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub threads: usize,
    /// Priority levels dropped because their queue was malformed
    pub malformed_queues: usize,
    /// Queue slots whose thread pointer could not be read
    pub skipped_slots: usize,
    /// Rows emitted with an unreadable name or program counter
    pub degraded_rows: usize,
    /// Busy counters that could not be reset
    pub reset_failures: usize,
}

/// Result of one update
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub os: &'static str,
    pub generation: KernelGeneration,
    pub topology: SchedulerTopology,
    pub columns: Vec<Column>,
    /// Elapsed time the runtime percentages are relative to
    pub window: Option<u64>,
    pub rows: Vec<ThreadRow>,
    pub stats: SnapshotStats,
}

impl Snapshot {
    /// Replace the sink's rows with this snapshot's
    pub fn emit(&self, sink: &mut dyn ThreadSink) {
        sink.clear();
        for row in &self.rows {
            sink.add_row(row.thread, &row.cells(&self.columns));
        }
    }

    #[must_use]
    pub fn row(&self, thread: ThreadAddr) -> Option<&ThreadRow> {
        self.rows.iter().find(|row| row.thread == thread)
    }
}

/// Builds snapshots for one session
pub struct SnapshotBuilder<'c> {
    context: &'c SessionContext,
    runtime: RuntimeAggregator,
}

impl<'c> SnapshotBuilder<'c> {
    #[must_use]
    pub fn new(context: &'c SessionContext, runtime: RuntimeAggregator) -> Self {
        Self { context, runtime }
    }

    /// Walk every scheduler instance and priority level once
    pub fn build(&self, memory: &mut dyn TargetMemory) -> Snapshot {
        let context = self.context;
        let layout = context.layout();
        let topology = context.topology();
        let mut stats = SnapshotStats::default();
        let mut rows = Vec::new();

        let current: Vec<(CoreId, Option<ThreadAddr>)> = topology
            .instances
            .iter()
            .flat_map(|instance| self.current_threads(&*memory, instance))
            .collect();

        for instance in &topology.instances {
            for level in 0..topology.priority_count {
                let queue = match ReadyQueue::read(&*memory, layout, instance.address, level) {
                    Ok(queue) => queue,
                    Err(e) => {
                        warn!("Scheduler 0x{:x}: {e}", instance.address);
                        stats.malformed_queues += 1;
                        continue;
                    }
                };

                let threads: Vec<_> = queue.threads(&*memory).collect();
                for slot in threads {
                    match slot {
                        Ok(thread) => {
                            let row = self.thread_row(
                                memory,
                                thread,
                                queue.level,
                                instance,
                                &current,
                                &mut stats,
                            );
                            rows.push(row);
                        }
                        Err(e) => {
                            warn!("Priority {}: skipping unreadable slot: {e}", queue.level);
                            stats.skipped_slots += 1;
                        }
                    }
                }
            }
        }

        stats.threads = rows.len();
        debug!("Snapshot complete: {stats:?}");

        Snapshot {
            os: layout.os_name,
            generation: layout.generation,
            topology: topology.kind,
            columns: context.columns().to_vec(),
            window: self.runtime.window(),
            rows,
            stats,
        }
    }

    /// Thread each core of `instance` is running
    fn current_threads(
        &self,
        memory: &dyn TargetMemory,
        instance: &SchedulerInstance,
    ) -> Vec<(CoreId, Option<ThreadAddr>)> {
        let layout = self.context.layout();
        let fields = FieldReader::new(memory, layout);
        instance
            .cores
            .iter()
            .map(|slot| {
                let path = indexed(&layout.scheduler.current_thread, slot.slot);
                let pointer =
                    fields.leading_pointer(layout.scheduler.type_name, instance.address, &path);
                let thread = match pointer {
                    Ok(0) => None,
                    Ok(ptr) => Some(ThreadAddr(ptr)),
                    Err(e) => {
                        warn!("{}: current thread unreadable: {e}", slot.core);
                        None
                    }
                };
                (slot.core, thread)
            })
            .collect()
    }

    fn thread_row(
        &self,
        memory: &mut dyn TargetMemory,
        thread: ThreadAddr,
        level: PriorityLevel,
        instance: &SchedulerInstance,
        current: &[(CoreId, Option<ThreadAddr>)],
        stats: &mut SnapshotStats,
    ) -> ThreadRow {
        let context = self.context;
        let layout = context.layout();
        let fields = FieldReader::new(&*memory, layout);

        let name = fields
            .thread_name(thread)
            .map_err(|e| warn!("Thread {thread}: name unreadable: {e}"))
            .ok();
        let process = fields.thread_process(thread).and_then(|p| fields.process_name(p)).ok();

        let for_deletion = fields.thread_flag(thread, layout.thread.for_deletion).unwrap_or(false);
        let is_blocking = fields.thread_flag(thread, layout.thread.is_blocking).unwrap_or(false);
        let status = ExecutionStatus::classify(thread, current, for_deletion, is_blocking);

        let registers = context.reconstructor().reconstruct(&*memory, thread);
        let stack = StackRegion {
            base: fields.thread_value(thread, layout.thread.stack_base).ok(),
            length: fields.thread_value(thread, layout.thread.stack_length).ok(),
            sp: registers.sp(),
        };

        let blocking = BlockingResolver::new(fields, context.chain_budget()).resolve(thread).ok();
        let blocking_on =
            blocking.as_ref().map(|b| b.render(context.chain_budget())).unwrap_or_default();

        let runtime = match self.runtime.read(memory, thread) {
            Ok((figure, reset_failed)) => {
                stats.reset_failures += usize::from(reset_failed);
                Some(figure)
            }
            Err(e) => {
                debug!("Thread {thread}: no busy counter: {e}");
                None
            }
        };

        if name.is_none() || registers.pc().is_none() {
            stats.degraded_rows += 1;
        }

        ThreadRow {
            thread,
            id: thread.display_id(context.id_base()),
            name,
            process,
            priority: level,
            core: instance.owner,
            status,
            pc: registers.pc(),
            blocking,
            blocking_on,
            stack,
            runtime,
        }
    }
}
