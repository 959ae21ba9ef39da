//! # Kernel Layout Tables (Target ↔ Debugger)
//!
//! Describes, per gkos kernel generation, everything the debugger side needs
//! to know about the target's in-memory structures: struct field paths,
//! exception-frame layouts, wait-pointer encodings, time units and the global
//! symbols used to discover the scheduler topology.
//!
//! All of it is plain `'static` data. The engine in `gkos-scope` selects one
//! [`KernelLayout`] at session start and never branches on the generation
//! again, so supporting a new kernel revision means adding a table here.
//!
//! ## Key Types
//!
//! - [`KernelGeneration`] - Selector for one of the known kernel revisions
//! - [`KernelLayout`] - Field paths and constants for one revision
//! - [`FrameLayout`] - Saved-context and exception-frame layout per architecture
//! - [`WaitLayout`] / [`DeadlineLayout`] - How a thread records what it waits on

#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::str::FromStr;

// ============================================================================
// Bounds and Defaults
// ============================================================================

/// Core count assumed when the target does not export `gk_ncores`
pub const DEFAULT_CORE_COUNT: u32 = 2;

/// Largest ready queue (in slots) that is still considered plausible
///
/// A `[start, end)` pair read from a half-updated vector can span gigabytes;
/// anything past this is reported as malformed instead of walked.
pub const MAX_QUEUE_SLOTS: u64 = 4096;

/// Longest thread or process name (in bytes) that will be read from the target
pub const MAX_NAME_LEN: u64 = 256;

/// Character budget for a rendered wait chain
pub const DEFAULT_CHAIN_BUDGET: usize = 64;

/// Hard limit on wait-chain levels, independent of the character budget
pub const MAX_CHAIN_DEPTH: usize = 32;

/// Mask selecting the primitive tag in a tagged wait pointer
pub const WAIT_TAG_MASK: u64 = 0b11;

// ============================================================================
// Architecture and Exception Frames
// ============================================================================

/// Target CPU architecture of a kernel generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Cortex-M7/M4, 32-bit words
    ArmV7M,
    /// Cortex-A35, 64-bit words
    AArch64,
}

impl Arch {
    /// Pointer and register width in bytes
    #[must_use]
    pub const fn pointer_size(self) -> u64 {
        match self {
            Arch::ArmV7M => 4,
            Arch::AArch64 => 8,
        }
    }
}

/// How the post-exception stack pointer is derived from the saved one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPointerPolicy {
    /// Cortex-M: the hardware frame sits on the process stack and may be
    /// followed by a lazily stacked FP bank and an alignment pad word.
    PostException {
        /// EXC_RETURN bit that is *clear* when an FP context was stacked
        fp_inactive_bit: u64,
        /// s0-s15, FPSCR and one reserved word
        fp_frame_bytes: u64,
        /// xPSR bit set when the core inserted a realignment word
        align_bit: u64,
        /// Size of that realignment word
        align_pad_bytes: u64,
    },
    /// The saved stack pointer is reported as-is
    Saved,
}

/// Register-file layout for one architecture
///
/// Register indices follow the debugger's register numbering for the
/// architecture, so `register_count` slots are always produced even when
/// only a subset can be recovered from memory.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub arch: Arch,
    pub register_count: usize,
    /// Thread field holding the saved stack pointer
    pub saved_sp_field: &'static str,
    /// Thread field where the callee-saved bank starts
    pub saved_base_field: &'static str,
    /// Register indices stored consecutively from `saved_base_field`
    pub saved_registers: &'static [usize],
    /// The word after the callee-saved bank holds EXC_RETURN
    pub exc_return_after_saved: bool,
    /// Register indices stored consecutively from the saved stack pointer
    pub stacked_registers: &'static [usize],
    /// `(byte offset from saved SP, register index)` pairs read individually
    pub stack_relative: &'static [(u64, usize)],
    pub sp_index: usize,
    pub lr_index: usize,
    pub pc_index: usize,
    pub status_index: usize,
    pub sp_policy: StackPointerPolicy,
}

impl FrameLayout {
    #[must_use]
    pub const fn word_size(&self) -> u64 {
        self.arch.pointer_size()
    }
}

/// r0-r12, sp, lr, pc, xPSR
pub static ARMV7M_FRAME: FrameLayout = FrameLayout {
    arch: Arch::ArmV7M,
    register_count: 17,
    saved_sp_field: "tss.psp",
    saved_base_field: "tss.r4",
    saved_registers: &[4, 5, 6, 7, 8, 9, 10, 11],
    exc_return_after_saved: true,
    stacked_registers: &[0, 1, 2, 3, 12, 14, 15, 16],
    stack_relative: &[],
    sp_index: 13,
    lr_index: 14,
    pc_index: 15,
    status_index: 16,
    sp_policy: StackPointerPolicy::PostException {
        fp_inactive_bit: 1 << 4,
        fp_frame_bytes: 4 * 18,
        align_bit: 1 << 9,
        align_pad_bytes: 4,
    },
};

/// x0-x30 at 0-30, sp at 32, pc at 33, cpsr at 41
pub static AARCH64_FRAME: FrameLayout = FrameLayout {
    arch: Arch::AArch64,
    register_count: 42,
    saved_sp_field: "tss.sp_el1",
    saved_base_field: "tss.r19",
    saved_registers: &[19, 20, 21, 22, 23, 24, 25, 26, 27, 28],
    exc_return_after_saved: false,
    stacked_registers: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 41, 33],
    stack_relative: &[(320, 29), (328, 30)],
    sp_index: 32,
    lr_index: 30,
    pc_index: 33,
    status_index: 41,
    sp_policy: StackPointerPolicy::Saved,
};

// ============================================================================
// Wait Descriptors
// ============================================================================

/// Unit of a scalar deadline or counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millis,
    Micros,
}

impl TimeUnit {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
        }
    }
}

/// Where a blocked thread keeps its wake-up deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineLayout {
    /// One integer field in `unit`; zero means "no deadline"
    Scalar { path: &'static str, unit: TimeUnit },
    /// A `timespec`; both halves zero means "no deadline"
    SecondsNanos { seconds: &'static str, nanos: &'static str },
}

/// Where a blocked thread records the object it waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitLayout {
    /// Plain `Thread *`
    Untagged { thread: &'static str },
    /// Pointer whose two low bits select thread / signal / queue / condition
    Tagged { target: &'static str },
    /// Separate thread and primitive pointers, primitive kind not recorded
    Split { thread: &'static str, primitive: &'static str },
}

/// Kind of synchronization primitive a thread can wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PrimitiveKind {
    Signal,
    Queue,
    Condition,
    /// Primitive pointer without a recorded kind
    Unspecified,
}

impl PrimitiveKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PrimitiveKind::Signal => "signal",
            PrimitiveKind::Queue => "queue",
            PrimitiveKind::Condition => "condition",
            PrimitiveKind::Unspecified => "sync",
        }
    }
}

/// Decoded tag of a tagged wait pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTag {
    Thread,
    Primitive(PrimitiveKind),
}

impl WaitTag {
    /// Decode the two low bits of a tagged pointer
    #[must_use]
    pub const fn from_pointer(value: u64) -> Self {
        match value & WAIT_TAG_MASK {
            0b00 => WaitTag::Thread,
            0b01 => WaitTag::Primitive(PrimitiveKind::Signal),
            0b10 => WaitTag::Primitive(PrimitiveKind::Queue),
            _ => WaitTag::Primitive(PrimitiveKind::Condition),
        }
    }
}

// ============================================================================
// Struct Layouts
// ============================================================================

/// `array[index].member` path template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedPath {
    pub array: &'static str,
    /// Empty when the element itself is the target
    pub member: &'static str,
}

/// libstdc++ `std::string` member names
#[derive(Debug, Clone, Copy)]
pub struct StringLayout {
    pub data: &'static str,
    pub length: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLayout {
    pub type_name: &'static str,
    /// Begin/end pointer pair of each priority level's thread vector
    pub ready_queue: IndexedPath,
    /// Per-core running thread slot (first word is the pointer)
    pub current_thread: IndexedPath,
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadLayout {
    pub type_name: &'static str,
    pub name: &'static str,
    /// Owning process reference (first word is the pointer)
    pub process: &'static str,
    pub is_blocking: &'static str,
    pub for_deletion: &'static str,
    pub stack_base: &'static str,
    pub stack_length: &'static str,
    /// Cumulative busy time counter
    pub busy_time: &'static str,
    pub busy_time_unit: TimeUnit,
    pub wait: WaitLayout,
    pub deadline: DeadlineLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessLayout {
    pub type_name: &'static str,
    pub name: &'static str,
}

/// Global symbols probed at session start
#[derive(Debug, Clone, Copy)]
pub struct TopologyProbes {
    /// `Scheduler scheds[ncores]`, one per core
    pub per_core_array: &'static str,
    /// `Scheduler sched` shared by all cores
    pub shared: &'static str,
    /// `Scheduler s` on single-core builds
    pub unified: &'static str,
    pub core_count: &'static str,
    pub priority_count: &'static str,
}

/// Global elapsed-time counter and the factor bringing it to busy-time units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedCounter {
    pub symbol: &'static str,
    pub scale: u64,
}

/// Everything that differs between kernel generations
#[derive(Debug, Clone, Copy)]
pub struct KernelLayout {
    pub generation: KernelGeneration,
    pub os_name: &'static str,
    pub frame: &'static FrameLayout,
    pub scheduler: SchedulerLayout,
    pub thread: ThreadLayout,
    pub process: ProcessLayout,
    pub string: StringLayout,
    pub probes: TopologyProbes,
    pub default_priority_count: u32,
    /// Subtracted from thread addresses for the ID column
    pub id_base: u64,
    pub elapsed: Option<ElapsedCounter>,
    pub context_switch_symbols: &'static [&'static str],
}

impl KernelLayout {
    #[must_use]
    pub const fn pointer_size(&self) -> u64 {
        self.frame.arch.pointer_size()
    }
}

const LIBSTDCXX_STRING: StringLayout =
    StringLayout { data: "_M_dataplus._M_p", length: "_M_string_length" };

const PROBES: TopologyProbes = TopologyProbes {
    per_core_array: "scheds",
    shared: "sched",
    unified: "s",
    core_count: "gk_ncores",
    priority_count: "gk_nprio",
};

const CURRENT_THREAD: IndexedPath = IndexedPath { array: "current_thread", member: "" };

pub static GK_LAYOUT: KernelLayout = KernelLayout {
    generation: KernelGeneration::Gk,
    os_name: "gkos",
    frame: &ARMV7M_FRAME,
    scheduler: SchedulerLayout {
        type_name: "Scheduler",
        ready_queue: IndexedPath { array: "tlist", member: "v.v" },
        current_thread: CURRENT_THREAD,
    },
    thread: ThreadLayout {
        type_name: "Thread",
        name: "name",
        process: "p",
        is_blocking: "is_blocking",
        for_deletion: "for_deletion",
        stack_base: "stack.address",
        stack_length: "stack.length",
        busy_time: "total_us_time",
        busy_time_unit: TimeUnit::Micros,
        wait: WaitLayout::Untagged { thread: "blocking_on" },
        deadline: DeadlineLayout::Scalar { path: "block_until", unit: TimeUnit::Millis },
    },
    process: ProcessLayout { type_name: "Process", name: "name" },
    string: LIBSTDCXX_STRING,
    probes: PROBES,
    default_priority_count: 10,
    id_base: 0x3800_0000,
    elapsed: None,
    context_switch_symbols: &["Yield"],
};

pub static GKV3_LAYOUT: KernelLayout = KernelLayout {
    generation: KernelGeneration::GkV3,
    os_name: "gkos",
    frame: &ARMV7M_FRAME,
    scheduler: SchedulerLayout {
        type_name: "Scheduler",
        ready_queue: IndexedPath { array: "tlist", member: "v" },
        current_thread: CURRENT_THREAD,
    },
    thread: ThreadLayout {
        type_name: "Thread",
        name: "name",
        process: "p",
        is_blocking: "is_blocking",
        for_deletion: "for_deletion",
        stack_base: "stack.address",
        stack_length: "stack.length",
        busy_time: "total_us_time",
        busy_time_unit: TimeUnit::Micros,
        wait: WaitLayout::Tagged { target: "blocking_on" },
        deadline: DeadlineLayout::Scalar { path: "block_until._us", unit: TimeUnit::Micros },
    },
    process: ProcessLayout { type_name: "Process", name: "name" },
    string: LIBSTDCXX_STRING,
    probes: PROBES,
    default_priority_count: 10,
    id_base: 0,
    elapsed: Some(ElapsedCounter { symbol: "_cur_ms", scale: 1000 }),
    context_switch_symbols: &["Yield"],
};

pub static GKV4_LAYOUT: KernelLayout = KernelLayout {
    generation: KernelGeneration::GkV4,
    os_name: "gkos",
    frame: &AARCH64_FRAME,
    scheduler: SchedulerLayout {
        type_name: "Scheduler",
        ready_queue: IndexedPath { array: "tlist", member: "v" },
        current_thread: CURRENT_THREAD,
    },
    thread: ThreadLayout {
        type_name: "Thread",
        name: "name",
        process: "p",
        is_blocking: "is_blocking",
        for_deletion: "for_deletion",
        stack_base: "stack.base",
        stack_length: "stack.length",
        busy_time: "total_us_time",
        busy_time_unit: TimeUnit::Micros,
        wait: WaitLayout::Split { thread: "blocking_on_thread", primitive: "blocking_on_prim" },
        deadline: DeadlineLayout::SecondsNanos {
            seconds: "block_until.tv_sec",
            nanos: "block_until.tv_nsec",
        },
    },
    process: ProcessLayout { type_name: "Process", name: "name" },
    string: LIBSTDCXX_STRING,
    probes: PROBES,
    default_priority_count: 5,
    id_base: 0,
    elapsed: None,
    context_switch_symbols: &["Yield"],
};

// ============================================================================
// Generation Selector
// ============================================================================

/// Known gkos kernel revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum KernelGeneration {
    /// Single-core Cortex-M7 kernel
    Gk,
    /// Dual-core Cortex-M7/M4 kernel with tagged wait pointers
    GkV3,
    /// AArch64 kernel with shared SMP scheduler
    #[default]
    GkV4,
}

impl KernelGeneration {
    pub const ALL: [KernelGeneration; 3] =
        [KernelGeneration::Gk, KernelGeneration::GkV3, KernelGeneration::GkV4];

    #[must_use]
    pub fn layout(self) -> &'static KernelLayout {
        match self {
            KernelGeneration::Gk => &GK_LAYOUT,
            KernelGeneration::GkV3 => &GKV3_LAYOUT,
            KernelGeneration::GkV4 => &GKV4_LAYOUT,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            KernelGeneration::Gk => "gk",
            KernelGeneration::GkV3 => "gkv3",
            KernelGeneration::GkV4 => "gkv4",
        }
    }
}

impl fmt::Display for KernelGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown generation name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownGeneration;

impl fmt::Display for UnknownGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown kernel generation (expected gk, gkv3 or gkv4)")
    }
}

impl core::error::Error for UnknownGeneration {}

impl FromStr for KernelGeneration {
    type Err = UnknownGeneration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KernelGeneration::ALL
            .into_iter()
            .find(|g| g.name().eq_ignore_ascii_case(s))
            .ok_or(UnknownGeneration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_tag_decoding() {
        assert_eq!(WaitTag::from_pointer(0x2000_1000), WaitTag::Thread);
        assert_eq!(WaitTag::from_pointer(0x2000_1001), WaitTag::Primitive(PrimitiveKind::Signal));
        assert_eq!(WaitTag::from_pointer(0x2000_1002), WaitTag::Primitive(PrimitiveKind::Queue));
        assert_eq!(
            WaitTag::from_pointer(0x2000_1003),
            WaitTag::Primitive(PrimitiveKind::Condition)
        );
    }

    #[test]
    fn test_generation_round_trip_names() {
        for g in KernelGeneration::ALL {
            assert_eq!(g.name().parse::<KernelGeneration>(), Ok(g));
            assert_eq!(g.layout().generation, g);
        }
        assert_eq!("GKV4".parse::<KernelGeneration>(), Ok(KernelGeneration::GkV4));
        assert!("freertos".parse::<KernelGeneration>().is_err());
    }

    #[test]
    fn test_frame_tables_fit_register_count() {
        for frame in [&ARMV7M_FRAME, &AARCH64_FRAME] {
            let all = frame
                .saved_registers
                .iter()
                .chain(frame.stacked_registers)
                .chain(frame.stack_relative.iter().map(|(_, r)| r));
            for &r in all {
                assert!(r < frame.register_count);
            }
            assert!(frame.pc_index < frame.register_count);
            assert!(frame.sp_index < frame.register_count);
        }
    }

    #[test]
    fn test_pointer_sizes() {
        assert_eq!(GK_LAYOUT.pointer_size(), 4);
        assert_eq!(GKV3_LAYOUT.pointer_size(), 4);
        assert_eq!(GKV4_LAYOUT.pointer_size(), 8);
    }
}
