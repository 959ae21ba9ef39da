//! Synthetic kernel images
//!
//! [`SyntheticKernel`] lays out schedulers, threads and processes in a
//! [`MemoryImage`] exactly the way a generation's [`KernelLayout`] describes
//! them, so the whole engine can run without a board. The replay binary uses
//! it for `--demo`; the tests use it to build targeted corner cases.
//!
//! Struct members are registered under nested type names (`Thread.tss`,
//! `Thread.name._M_dataplus`, ...) with the intermediate members at offset 0,
//! so every member path resolves to the offset chosen here.

use gkos_scope_common::{
    Arch, DeadlineLayout, KernelGeneration, KernelLayout, PrimitiveKind, TimeUnit, WaitLayout,
    DEFAULT_CORE_COUNT,
};
use std::collections::BTreeMap;

use super::{FieldLayout, MemoryImage, SymbolInfo};
use crate::domain::{CoreId, Deadline, ProcessAddr, ThreadAddr};
use crate::introspection::SchedulerTopology;

const GLOBALS_BASE: u64 = 0x1000_0000;
const CODE_BASE: u64 = 0x0800_0000;
const STACK_SIZE: u64 = 0x800;
/// Room left above the saved stack pointer for the exception frame
const FRAME_RESERVE: u64 = 0x200;

/// Values written into a thread's context, for checking reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub pc: u64,
    pub stack_base: u64,
    pub stack_length: u64,
    pub saved_sp: u64,
}

/// Builder for a consistent kernel image of one generation
#[derive(Debug, Clone)]
pub struct SyntheticKernel {
    image: MemoryImage,
    layout: &'static KernelLayout,
    topology: SchedulerTopology,
    core_count: u32,
    priority_count: u32,
    schedulers: Vec<u64>,
    /// Thread pointers per scheduler instance and priority level
    queues: Vec<Vec<Vec<u64>>>,
    /// `(offset, size)` of every member path, keyed `Type:path`
    members: BTreeMap<String, (u64, u64)>,
    threads: BTreeMap<ThreadAddr, ThreadInfo>,
    heap: u64,
    globals: u64,
}

impl SyntheticKernel {
    /// Empty kernel with `core_count` cores (forced to one for [`SchedulerTopology::Unified`])
    #[must_use]
    pub fn new(generation: KernelGeneration, topology: SchedulerTopology, core_count: u32) -> Self {
        let layout = generation.layout();
        let core_count = match topology {
            SchedulerTopology::Unified => 1,
            SchedulerTopology::Amp | SchedulerTopology::SmpShared => core_count.max(1),
        };
        let heap = match layout.frame.arch {
            _ if layout.id_base != 0 => layout.id_base + 0x1000,
            Arch::ArmV7M => 0x2000_1000,
            Arch::AArch64 => 0x4010_0000,
        };

        let mut kernel = SyntheticKernel {
            image: MemoryImage::new(),
            layout,
            topology,
            core_count,
            priority_count: layout.default_priority_count,
            schedulers: Vec::new(),
            queues: Vec::new(),
            members: BTreeMap::new(),
            threads: BTreeMap::new(),
            heap,
            globals: GLOBALS_BASE,
        };
        kernel.image.set_generation(generation);
        kernel.define_thread_type();
        kernel.define_process_type();
        kernel.define_schedulers();
        kernel
    }

    /// Kernel with the generation's usual topology and two cores
    #[must_use]
    pub fn for_generation(generation: KernelGeneration) -> Self {
        let topology = match generation {
            KernelGeneration::Gk => SchedulerTopology::Unified,
            KernelGeneration::GkV3 => SchedulerTopology::Amp,
            KernelGeneration::GkV4 => SchedulerTopology::SmpShared,
        };
        Self::new(generation, topology, DEFAULT_CORE_COUNT)
    }

    #[must_use]
    pub fn layout(&self) -> &'static KernelLayout {
        self.layout
    }

    #[must_use]
    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut MemoryImage {
        &mut self.image
    }

    #[must_use]
    pub fn into_image(self) -> MemoryImage {
        self.image
    }

    #[must_use]
    pub fn scheduler(&self, instance: usize) -> Option<u64> {
        self.schedulers.get(instance).copied()
    }

    #[must_use]
    pub fn thread_info(&self, thread: ThreadAddr) -> Option<ThreadInfo> {
        self.threads.get(&thread).copied()
    }

    // ------------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------------

    fn pointer(&self) -> u64 {
        self.layout.pointer_size()
    }

    /// Register `path` under `root`, creating intermediate types as needed
    fn define_member(&mut self, root: &str, path: &str, offset: u64, size: u64) {
        let segments: Vec<&str> = path.split('.').collect();
        let mut ty = root.to_string();
        for (i, segment) in segments.iter().enumerate() {
            if i + 1 == segments.len() {
                let field = FieldLayout { offset, size, ..FieldLayout::default() };
                self.image.type_mut(&ty).fields.insert((*segment).to_string(), field);
            } else {
                let nested = format!("{ty}.{segment}");
                self.image
                    .type_mut(&ty)
                    .fields
                    .entry((*segment).to_string())
                    .or_insert_with(|| FieldLayout {
                        ty: Some(nested.clone()),
                        ..FieldLayout::default()
                    });
                self.image.type_mut(&nested);
                ty = nested;
            }
        }
        self.members.insert(format!("{root}:{path}"), (offset, size));
    }

    fn member(&self, root: &str, path: &str) -> (u64, u64) {
        self.members.get(&format!("{root}:{path}")).copied().unwrap_or((0, 0))
    }

    /// Allocate consecutive 8-byte aligned members and return the total size
    fn define_members(&mut self, root: &str, members: &[(String, u64)]) -> u64 {
        let mut cursor = 0;
        for (path, size) in members {
            self.define_member(root, path, cursor, (*size).min(8));
            cursor += size.div_ceil(8) * 8;
        }
        cursor
    }

    fn define_thread_type(&mut self) {
        let p = self.pointer();
        let layout = self.layout;
        let thread = &layout.thread;
        let frame = layout.frame;
        let string = layout.string;

        let mut members = vec![
            (format!("{}.{}", thread.name, string.data), p),
            (format!("{}.{}", thread.name, string.length), p),
            (thread.process.to_string(), p),
            (thread.is_blocking.to_string(), 1),
            (thread.for_deletion.to_string(), 1),
            (thread.stack_base.to_string(), p),
            (thread.stack_length.to_string(), p),
            (thread.busy_time.to_string(), 8),
        ];
        match thread.wait {
            WaitLayout::Untagged { thread } => members.push((thread.to_string(), p)),
            WaitLayout::Tagged { target } => members.push((target.to_string(), p)),
            WaitLayout::Split { thread, primitive } => {
                members.push((thread.to_string(), p));
                members.push((primitive.to_string(), p));
            }
        }
        match thread.deadline {
            DeadlineLayout::Scalar { path, .. } => members.push((path.to_string(), 8)),
            DeadlineLayout::SecondsNanos { seconds, nanos } => {
                members.push((seconds.to_string(), 8));
                members.push((nanos.to_string(), 8));
            }
        }
        members.push((frame.saved_sp_field.to_string(), p));
        let bank_words =
            frame.saved_registers.len() as u64 + u64::from(frame.exc_return_after_saved);
        members.push((frame.saved_base_field.to_string(), bank_words * p));

        let size = self.define_members(thread.type_name, &members);
        // The register bank is addressed, never read as one value
        let (bank, _) = self.member(thread.type_name, frame.saved_base_field);
        self.define_member(thread.type_name, frame.saved_base_field, bank, p);
        self.image.type_mut(thread.type_name).size = size;
    }

    fn define_process_type(&mut self) {
        let p = self.pointer();
        let process = self.layout.process;
        let string = self.layout.string;
        let members = vec![
            (format!("{}.{}", process.name, string.data), p),
            (format!("{}.{}", process.name, string.length), p),
        ];
        let size = self.define_members(process.type_name, &members);
        self.image.type_mut(process.type_name).size = size;
    }

    fn define_schedulers(&mut self) {
        let p = self.pointer();
        let scheduler = self.layout.scheduler;
        let ty = scheduler.type_name;

        let queue_ty = format!("{ty}.{}", scheduler.ready_queue.array);
        let queue_size = 3 * p;
        self.image.type_mut(&queue_ty).size = queue_size;
        if !scheduler.ready_queue.member.is_empty() {
            self.define_member(&queue_ty, scheduler.ready_queue.member, 0, 0);
        }
        self.image.type_mut(ty).fields.insert(
            scheduler.ready_queue.array.to_string(),
            FieldLayout { offset: 0, size: 0, ty: Some(queue_ty), stride: Some(queue_size) },
        );

        let current_offset = u64::from(self.priority_count) * queue_size;
        self.image.type_mut(ty).fields.insert(
            scheduler.current_thread.array.to_string(),
            FieldLayout { offset: current_offset, size: p, ty: None, stride: Some(p) },
        );
        let size = (current_offset + u64::from(self.core_count) * p).div_ceil(16) * 16;
        self.image.type_mut(ty).size = size;

        let instances = match self.topology {
            SchedulerTopology::Amp => self.core_count,
            SchedulerTopology::SmpShared | SchedulerTopology::Unified => 1,
        };
        let base = self.alloc_global(size * u64::from(instances));
        self.image.define_symbol(
            self.topology.symbol(self.layout),
            SymbolInfo { address: base, size: 0, ty: Some(ty.to_string()) },
        );
        self.schedulers = (0..u64::from(instances)).map(|i| base + i * size).collect();
        self.queues = vec![vec![Vec::new(); self.priority_count as usize]; self.schedulers.len()];
        for instance in 0..self.schedulers.len() {
            for level in 0..self.priority_count {
                self.write_queue(instance, level);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    fn alloc(&mut self, size: u64) -> u64 {
        let addr = self.heap;
        self.heap += size.div_ceil(16) * 16;
        self.image.write_bytes(addr, &vec![0u8; usize::try_from(size).unwrap_or(0)]);
        addr
    }

    fn alloc_global(&mut self, size: u64) -> u64 {
        let addr = self.globals;
        self.globals += size.div_ceil(16) * 16;
        self.image.write_bytes(addr, &vec![0u8; usize::try_from(size).unwrap_or(0)]);
        addr
    }

    fn write_member(&mut self, root: &str, base: u64, path: &str, value: u64) {
        let (offset, size) = self.member(root, path);
        self.image.write_le(base + offset, size, value);
    }

    fn write_string(&mut self, root: &str, base: u64, path: &str, text: &str) {
        let data = self.alloc(text.len().max(1) as u64);
        self.image.write_bytes(data, text.as_bytes());
        let string = self.layout.string;
        self.write_member(root, base, &format!("{path}.{}", string.data), data);
        self.write_member(root, base, &format!("{path}.{}", string.length), text.len() as u64);
    }

    // ------------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------------

    /// Export `gk_ncores` and `gk_nprio`
    pub fn export_counts(&mut self) {
        let probes = self.layout.probes;
        self.define_counter(probes.core_count, 4, u64::from(self.core_count));
        self.define_counter(probes.priority_count, 4, u64::from(self.priority_count));
    }

    /// Define a scalar global of `width` bytes
    pub fn define_counter(&mut self, name: &str, width: u64, value: u64) -> u64 {
        let addr = match self.image.symbol(name) {
            Some(existing) => existing.address,
            None => {
                let addr = self.alloc_global(8);
                self.image.define_symbol(name, SymbolInfo { address: addr, size: width, ty: None });
                addr
            }
        };
        self.image.write_le(addr, width, value);
        addr
    }

    /// Set the generation's elapsed-time counter (raw, before scaling)
    ///
    /// Returns `false` if the generation has no such counter.
    pub fn set_elapsed(&mut self, raw: u64) -> bool {
        match self.layout.elapsed {
            Some(counter) => {
                self.define_counter(counter.symbol, 8, raw);
                true
            }
            None => false,
        }
    }

    /// Define the context-switch routine symbols
    pub fn define_context_switch(&mut self) {
        for (i, symbol) in self.layout.context_switch_symbols.iter().enumerate() {
            self.image.define_symbol(
                *symbol,
                SymbolInfo { address: CODE_BASE + 0x400 + i as u64 * 0x40, size: 0, ty: None },
            );
        }
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    pub fn add_process(&mut self, name: &str) -> ProcessAddr {
        let ty = self.layout.process.type_name;
        let size = self.image.type_layout(ty).map_or(0, |t| t.size);
        let process = self.alloc(size);
        self.write_string(ty, process, self.layout.process.name, name);
        ProcessAddr(process)
    }

    /// Create a suspended thread with a plausible saved context
    pub fn add_thread(&mut self, name: &str, process: Option<ProcessAddr>) -> ThreadAddr {
        let p = self.pointer();
        let layout = self.layout;
        let ty = layout.thread.type_name;
        let frame = layout.frame;
        let size = self.image.type_layout(ty).map_or(0, |t| t.size);
        let thread = self.alloc(size);
        let serial = self.threads.len() as u64;

        self.write_string(ty, thread, layout.thread.name, name);
        self.write_member(ty, thread, layout.thread.process, process.map_or(0, |owner| owner.0));

        let stack_base = self.alloc(STACK_SIZE);
        self.write_member(ty, thread, layout.thread.stack_base, stack_base);
        self.write_member(ty, thread, layout.thread.stack_length, STACK_SIZE);

        let saved_sp = stack_base + STACK_SIZE - FRAME_RESERVE;
        self.write_member(ty, thread, frame.saved_sp_field, saved_sp);

        let code = match frame.arch {
            Arch::ArmV7M => CODE_BASE,
            Arch::AArch64 => 0xffff_0000_0008_0000,
        };
        let pc = code + 0x1000 + serial * 0x100;
        let status = match frame.arch {
            Arch::ArmV7M => 0x0100_0000,
            Arch::AArch64 => 0x3c5,
        };

        let (bank, _) = self.member(ty, frame.saved_base_field);
        let bank = thread + bank;
        for (k, &index) in frame.saved_registers.iter().enumerate() {
            self.image.write_le(bank + k as u64 * p, p, 0x1000 * (serial + 1) + index as u64);
        }
        if frame.exc_return_after_saved {
            let exc_return = bank + frame.saved_registers.len() as u64 * p;
            self.image.write_le(exc_return, p, 0xFFFF_FFFD);
        }

        for (k, &index) in frame.stacked_registers.iter().enumerate() {
            let value = if index == frame.pc_index {
                pc
            } else if index == frame.status_index {
                status
            } else if index == frame.lr_index {
                code + 0x801 + serial * 0x100
            } else {
                0x1000 * (serial + 1) + index as u64
            };
            self.image.write_le(saved_sp + k as u64 * p, p, value);
        }
        for &(offset, index) in frame.stack_relative {
            let value = if index == frame.lr_index {
                code + 0x801 + serial * 0x100
            } else {
                saved_sp + 0x100
            };
            self.image.write_le(saved_sp + offset, p, value);
        }

        let thread = ThreadAddr(thread);
        self.threads
            .insert(thread, ThreadInfo { pc, stack_base, stack_length: STACK_SIZE, saved_sp });
        thread
    }

    /// Append `thread` to a ready queue
    pub fn enqueue(&mut self, instance: usize, level: u32, thread: ThreadAddr) {
        if let Some(queue) = self.queues.get_mut(instance).and_then(|q| q.get_mut(level as usize)) {
            queue.push(thread.0);
            self.write_queue(instance, level);
        }
    }

    /// Rewrite a queue's vector storage and bounds
    fn write_queue(&mut self, instance: usize, level: u32) {
        let p = self.pointer();
        let slots = self.queues[instance][level as usize].clone();
        let storage = self.alloc((slots.len() as u64).max(1) * p);
        for (i, thread) in slots.iter().enumerate() {
            self.image.write_le(storage + i as u64 * p, p, *thread);
        }
        self.set_raw_queue(instance, level, storage, storage + slots.len() as u64 * p);
    }

    /// Overwrite a queue's `[start, end)` pointers directly
    pub fn set_raw_queue(&mut self, instance: usize, level: u32, start: u64, end: u64) {
        let p = self.pointer();
        let Some(&scheduler) = self.schedulers.get(instance) else {
            return;
        };
        let vector = scheduler + u64::from(level) * 3 * p;
        self.image.write_le(vector, p, start);
        self.image.write_le(vector + p, p, end);
        self.image.write_le(vector + 2 * p, p, end);
    }

    /// Record `thread` as running on `core`
    pub fn set_current(&mut self, core: CoreId, thread: Option<ThreadAddr>) {
        let p = self.pointer();
        let (instance, slot) = match self.topology {
            SchedulerTopology::Amp => (core.0 as usize, 0),
            SchedulerTopology::SmpShared => (0, u64::from(core.0)),
            SchedulerTopology::Unified => (0, 0),
        };
        let Some(&scheduler) = self.schedulers.get(instance) else {
            return;
        };
        let offset = u64::from(self.priority_count) * 3 * p;
        self.image.write_le(scheduler + offset + slot * p, p, thread.map_or(0, |t| t.0));
    }

    // ------------------------------------------------------------------------
    // Thread state
    // ------------------------------------------------------------------------

    fn thread_member(&mut self, thread: ThreadAddr, path: &str, value: u64) {
        let ty = self.layout.thread.type_name;
        self.write_member(ty, thread.0, path, value);
    }

    pub fn set_blocking(&mut self, thread: ThreadAddr, blocking: bool) {
        self.thread_member(thread, self.layout.thread.is_blocking, u64::from(blocking));
    }

    pub fn set_deleted(&mut self, thread: ThreadAddr) {
        self.thread_member(thread, self.layout.thread.for_deletion, 1);
    }

    pub fn set_busy_time(&mut self, thread: ThreadAddr, busy: u64) {
        self.thread_member(thread, self.layout.thread.busy_time, busy);
    }

    /// Mark `thread` blocking on `target`
    pub fn block_on_thread(&mut self, thread: ThreadAddr, target: ThreadAddr) {
        self.set_blocking(thread, true);
        let path = match self.layout.thread.wait {
            WaitLayout::Untagged { thread } | WaitLayout::Split { thread, .. } => thread,
            WaitLayout::Tagged { target } => target,
        };
        self.thread_member(thread, path, target.0);
    }

    /// Mark `thread` blocking on a primitive
    ///
    /// Returns `false` if the generation cannot record primitives.
    pub fn block_on_primitive(
        &mut self,
        thread: ThreadAddr,
        kind: PrimitiveKind,
        address: u64,
    ) -> bool {
        let tag = match kind {
            PrimitiveKind::Signal => 0b01,
            PrimitiveKind::Queue => 0b10,
            PrimitiveKind::Condition | PrimitiveKind::Unspecified => 0b11,
        };
        match self.layout.thread.wait {
            WaitLayout::Untagged { .. } => false,
            WaitLayout::Tagged { target } => {
                self.set_blocking(thread, true);
                self.thread_member(thread, target, address | tag);
                true
            }
            WaitLayout::Split { primitive, .. } => {
                self.set_blocking(thread, true);
                self.thread_member(thread, primitive, address);
                true
            }
        }
    }

    /// Mark `thread` blocking until `deadline`, converted to the kernel's units
    pub fn block_until(&mut self, thread: ThreadAddr, deadline: Deadline) {
        self.set_blocking(thread, true);
        match self.layout.thread.deadline {
            DeadlineLayout::Scalar { path, unit } => {
                let value = match (deadline, unit) {
                    (Deadline::Millis(v) | Deadline::Micros(v), _) => v,
                    (Deadline::Timespec { secs, nanos }, TimeUnit::Millis) => {
                        secs * 1000 + nanos / 1_000_000
                    }
                    (Deadline::Timespec { secs, nanos }, TimeUnit::Micros) => {
                        secs * 1_000_000 + nanos / 1000
                    }
                };
                self.thread_member(thread, path, value);
            }
            DeadlineLayout::SecondsNanos { seconds, nanos } => {
                let (s, ns) = match deadline {
                    Deadline::Timespec { secs, nanos } => (secs, nanos),
                    Deadline::Millis(v) => (v / 1000, (v % 1000) * 1_000_000),
                    Deadline::Micros(v) => (v / 1_000_000, (v % 1_000_000) * 1000),
                };
                self.thread_member(thread, seconds, s);
                self.thread_member(thread, nanos, ns);
            }
        }
    }

    /// Point the thread's saved stack pointer somewhere else
    pub fn set_saved_sp(&mut self, thread: ThreadAddr, sp: u64) {
        self.thread_member(thread, self.layout.frame.saved_sp_field, sp);
    }

    /// Make the thread's name unreadable (data pointer into unmapped memory)
    pub fn break_name(&mut self, thread: ThreadAddr) {
        let path = format!("{}.{}", self.layout.thread.name, self.layout.string.data);
        self.thread_member(thread, &path, 0x10);
    }

    /// Flag an FP context in the saved EXC_RETURN (ARMv7-M only)
    pub fn set_fp_context(&mut self, thread: ThreadAddr, stacked: bool) {
        let frame = self.layout.frame;
        if !frame.exc_return_after_saved {
            return;
        }
        let p = self.pointer();
        let (bank, _) = self.member(self.layout.thread.type_name, frame.saved_base_field);
        let value = if stacked { 0xFFFF_FFED } else { 0xFFFF_FFFD };
        self.image.write_le(thread.0 + bank + frame.saved_registers.len() as u64 * p, p, value);
    }

    /// Overwrite the stacked status register of a thread
    pub fn set_stacked_status(&mut self, thread: ThreadAddr, status: u64) {
        let frame = self.layout.frame;
        let Some(info) = self.threads.get(&thread).copied() else {
            return;
        };
        if let Some(k) = frame.stacked_registers.iter().position(|&r| r == frame.status_index) {
            let p = self.pointer();
            self.image.write_le(info.saved_sp + k as u64 * p, p, status);
        }
    }
}

/// A small but complete scenario for one generation
///
/// Threads in several priority levels and processes, one running per core,
/// a two-level wait chain ending in a timeout, a primitive wait (where the
/// generation records primitives), a bare blocking thread and a thread
/// pending deletion.
#[must_use]
pub fn demo(generation: KernelGeneration) -> MemoryImage {
    let mut k = SyntheticKernel::for_generation(generation);
    k.export_counts();
    k.define_context_switch();
    let per_core = k.topology == SchedulerTopology::Amp;
    let second = usize::from(per_core && k.core_count > 1);

    let kernel = k.add_process("kernel");
    let gui = k.add_process("gui");
    let net = k.add_process("net");

    let idle = k.add_thread("idle", Some(kernel));
    let gui_main = k.add_thread("gui_main", Some(gui));
    let net_rx = k.add_thread("net_rx", Some(net));
    let disk_io = k.add_thread("disk_io", Some(kernel));
    let logger = k.add_thread("logger", Some(kernel));
    let waiter = k.add_thread("cond_waiter", Some(gui));
    let reaper = k.add_thread("old_worker", Some(net));

    k.enqueue(0, 0, idle);
    k.enqueue(0, 2, gui_main);
    k.enqueue(second, 3, net_rx);
    k.enqueue(second, 3, disk_io);
    k.enqueue(0, 1, logger);
    k.enqueue(second, 2, waiter);
    k.enqueue(0, 1, reaper);

    k.set_current(CoreId(0), Some(gui_main));
    if k.core_count > 1 {
        k.set_current(CoreId(1), Some(idle));
    }

    k.block_on_thread(net_rx, disk_io);
    k.block_until(disk_io, Deadline::Millis(1500));
    k.set_blocking(logger, true);
    if !k.block_on_primitive(waiter, PrimitiveKind::Condition, 0x2000_3400) {
        k.block_on_thread(waiter, logger);
    }
    k.block_until(waiter, Deadline::Timespec { secs: 12, nanos: 0 });
    k.set_deleted(reaper);

    let busy_times =
        [(idle, 6_000), (gui_main, 2_500), (net_rx, 900), (disk_io, 400), (logger, 200)];
    for (thread, busy) in busy_times {
        k.set_busy_time(thread, busy);
    }
    k.set_elapsed(10);
    k.set_fp_context(gui_main, true);
    k.into_image()
}
