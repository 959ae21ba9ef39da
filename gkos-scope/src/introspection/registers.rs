//! # Register Context Reconstructor
//!
//! A thread that is not running keeps its register state in two places: the
//! callee-saved bank inside the thread object (written by the context switch)
//! and the exception frame the core pushed onto the thread's stack. This
//! module merges both into a full register file, driven entirely by a
//! [`FrameLayout`] table.
//!
//! ## ARMv7-M
//!
//! ```text
//! Thread                        process stack (saved SP)
//! ┌──────────────┐              ┌──────────┐ +0x00  r0
//! │ tss.r4..r11  │ 8 words      │ r1..r3   │
//! │ EXC_RETURN   │ 1 word       │ r12      │ +0x10
//! │ tss.psp ─────┼─────────────▶│ lr, pc   │
//! └──────────────┘              │ xPSR     │ +0x1c
//!                               │ s0..s15, │ only if EXC_RETURN bit 4 clear
//!                               │ FPSCR, - │ (18 words)
//!                               │ pad      │ only if xPSR bit 9 set
//!                               └──────────┘ ◀── reconstructed SP
//! ```
//!
//! ## AArch64
//!
//! x19-x28 come from the thread object; x0-x18, the saved PSTATE and the
//! return address follow each other on the stack; x29/x30 sit at fixed
//! offsets above. The saved stack pointer is reported unchanged.

use gkos_scope_common::{FrameLayout, KernelLayout, StackPointerPolicy};
use serde::Serialize;

use crate::domain::ThreadAddr;
use crate::target::{Expr, TargetMemory};

/// Register file of one thread
///
/// Slots the target could not supply are `None` until a caller asks for a
/// plain value, at which point they read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterFile {
    values: Vec<Option<u64>>,
    sp_index: usize,
    pc_index: usize,
    lr_index: usize,
}

impl RegisterFile {
    #[must_use]
    pub fn empty(frame: &FrameLayout) -> Self {
        Self {
            values: vec![None; frame.register_count],
            sp_index: frame.sp_index,
            pc_index: frame.pc_index,
            lr_index: frame.lr_index,
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<u64> {
        self.values.get(index).copied().flatten()
    }

    pub fn set(&mut self, index: usize, value: Option<u64>) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    #[must_use]
    pub fn value_or_zero(&self, index: usize) -> u64 {
        self.get(index).unwrap_or(0)
    }

    #[must_use]
    pub fn pc(&self) -> Option<u64> {
        self.get(self.pc_index)
    }

    #[must_use]
    pub fn sp(&self) -> Option<u64> {
        self.get(self.sp_index)
    }

    #[must_use]
    pub fn lr(&self) -> Option<u64> {
        self.get(self.lr_index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of slots the target actually supplied
    #[must_use]
    pub fn recovered(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Every register as a plain value, unreadable ones as zero
    #[must_use]
    pub fn to_values(&self) -> Vec<u64> {
        self.values.iter().map(|v| v.unwrap_or(0)).collect()
    }
}

/// Rebuilds a suspended thread's registers from target memory
pub trait ContextReconstructor {
    fn reconstruct(&self, memory: &dyn TargetMemory, thread: ThreadAddr) -> RegisterFile;
}

/// Table-driven reconstructor for any [`FrameLayout`]
#[derive(Debug, Clone, Copy)]
pub struct FrameTable {
    thread_type: &'static str,
    frame: &'static FrameLayout,
}

impl FrameTable {
    #[must_use]
    pub fn new(layout: &'static KernelLayout) -> Self {
        Self { thread_type: layout.thread.type_name, frame: layout.frame }
    }

    #[must_use]
    pub fn frame(&self) -> &'static FrameLayout {
        self.frame
    }

    /// Stack pointer after the exception frame has been popped
    ///
    /// Wraps at the frame's word size like the core's own SP arithmetic.
    fn post_exception_sp(
        &self,
        saved_sp: u64,
        exc_return: Option<u64>,
        status: Option<u64>,
    ) -> u64 {
        let frame = self.frame;
        match frame.sp_policy {
            StackPointerPolicy::Saved => saved_sp,
            StackPointerPolicy::PostException {
                fp_inactive_bit,
                fp_frame_bytes,
                align_bit,
                align_pad_bytes,
            } => {
                let stacked = frame.stacked_registers.len() as u64 * frame.word_size();
                let mut sp = saved_sp.wrapping_add(stacked);
                // Unknown EXC_RETURN is treated as a basic frame
                if exc_return.is_some_and(|lr| lr & fp_inactive_bit == 0) {
                    sp = sp.wrapping_add(fp_frame_bytes);
                }
                if status.is_some_and(|psr| psr & align_bit != 0) {
                    sp = sp.wrapping_add(align_pad_bytes);
                }
                sp & word_mask(frame.word_size())
            }
        }
    }
}

fn word_mask(word: u64) -> u64 {
    if word >= 8 {
        u64::MAX
    } else {
        (1 << (word * 8)) - 1
    }
}

/// Read consecutive words starting at `start`, one per register index
///
/// Returns the address just past the last word; `None` once the walk runs
/// off the top of the address space, after which every register is unread.
fn read_consecutive(
    memory: &dyn TargetMemory,
    regs: &mut RegisterFile,
    start: u64,
    word: u64,
    indices: &[usize],
) -> Option<u64> {
    let mut addr = Some(start);
    for &index in indices {
        regs.set(index, addr.and_then(|a| memory.read_word(a, word).ok()));
        addr = addr.and_then(|a| a.checked_add(word));
    }
    addr
}

impl ContextReconstructor for FrameTable {
    fn reconstruct(&self, memory: &dyn TargetMemory, thread: ThreadAddr) -> RegisterFile {
        let frame = self.frame;
        let word = frame.word_size();
        let mut regs = RegisterFile::empty(frame);

        let mut exc_return = None;
        let bank = Expr::field_address(self.thread_type, thread.0, frame.saved_base_field);
        if let Ok(base) = memory.evaluate(&bank) {
            let after = read_consecutive(memory, &mut regs, base, word, frame.saved_registers);
            if frame.exc_return_after_saved {
                exc_return = after.and_then(|addr| memory.read_word(addr, word).ok());
            }
        }

        let saved = Expr::field(self.thread_type, thread.0, frame.saved_sp_field);
        let Ok(saved_sp) = memory.evaluate(&saved) else {
            return regs;
        };

        read_consecutive(memory, &mut regs, saved_sp, word, frame.stacked_registers);
        for &(offset, index) in frame.stack_relative {
            let value = saved_sp
                .checked_add(offset)
                .and_then(|addr| memory.read_word(addr, word).ok());
            regs.set(index, value);
        }

        let status = regs.get(frame.status_index);
        regs.set(frame.sp_index, Some(self.post_exception_sp(saved_sp, exc_return, status)));
        regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{FieldLayout, MemoryImage, TypeLayout};
    use gkos_scope_common::{GKV4_LAYOUT, GK_LAYOUT};

    const THREAD: u64 = 0x3800_1000;
    const STACK: u64 = 0x2000_0100;

    /// Thread type with `tss.psp` / `tss.r4` (or the AArch64 pair) at fixed offsets
    fn image(layout: &'static KernelLayout) -> MemoryImage {
        let word = layout.pointer_size();
        let mut image = MemoryImage::new();
        let mut tss = TypeLayout { size: 0x100, ..TypeLayout::default() };
        let (sp_field, base_field) = (
            layout.frame.saved_sp_field.trim_start_matches("tss."),
            layout.frame.saved_base_field.trim_start_matches("tss."),
        );
        let scalar = |offset| FieldLayout { offset, size: word, ..FieldLayout::default() };
        tss.fields.insert(sp_field.into(), scalar(0));
        tss.fields.insert(base_field.into(), scalar(word));
        image.define_type("Tss", tss);
        let mut thread = TypeLayout { size: 0x200, ..TypeLayout::default() };
        let tss_member =
            FieldLayout { offset: 0x40, ty: Some("Tss".into()), ..FieldLayout::default() };
        thread.fields.insert("tss".into(), tss_member);
        image.define_type("Thread", thread);
        image.write_bytes(THREAD, &[0u8; 0x200]);
        image.write_bytes(STACK, &[0u8; 0x200]);
        image.write_le(THREAD + 0x40, word, STACK);
        image
    }

    fn armv7m_thread(exc_return: u64, xpsr: u64) -> MemoryImage {
        let mut image = image(&GK_LAYOUT);
        for i in 0..8 {
            image.write_le(THREAD + 0x44 + i * 4, 4, 0x400 + i);
        }
        image.write_le(THREAD + 0x44 + 32, 4, exc_return);
        for (i, value) in [0, 1, 2, 3, 12, 0x0800_1235, 0x0800_2000, xpsr].into_iter().enumerate() {
            image.write_le(STACK + i as u64 * 4, 4, value);
        }
        image
    }

    #[test]
    fn test_armv7m_basic_frame() {
        let image = armv7m_thread(0xFFFF_FFFD, 0x0100_0000);
        let regs = FrameTable::new(&GK_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.len(), 17);
        assert_eq!(regs.get(4), Some(0x400));
        assert_eq!(regs.get(11), Some(0x407));
        assert_eq!(regs.get(12), Some(12));
        assert_eq!(regs.lr(), Some(0x0800_1235));
        assert_eq!(regs.pc(), Some(0x0800_2000));
        assert_eq!(regs.sp(), Some(STACK + 32));
    }

    #[test]
    fn test_armv7m_fp_context_moves_sp_by_fp_block() {
        let table = FrameTable::new(&GK_LAYOUT);
        let basic = table.reconstruct(&armv7m_thread(0xFFFF_FFFD, 0x0100_0000), ThreadAddr(THREAD));
        let with_fp =
            table.reconstruct(&armv7m_thread(0xFFFF_FFED, 0x0100_0000), ThreadAddr(THREAD));
        assert_eq!(with_fp.value_or_zero(13) - basic.value_or_zero(13), 72);
    }

    #[test]
    fn test_armv7m_alignment_pad() {
        let table = FrameTable::new(&GK_LAYOUT);
        let regs = table.reconstruct(&armv7m_thread(0xFFFF_FFED, 0x0100_0200), ThreadAddr(THREAD));
        assert_eq!(regs.sp(), Some(STACK + 32 + 72 + 4));
    }

    #[test]
    fn test_unreadable_stack_reads_as_zero() {
        let mut image = armv7m_thread(0xFFFF_FFFD, 0x0100_0000);
        image.write_le(THREAD + 0x40, 4, 0x9000_0000);
        let regs = FrameTable::new(&GK_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.pc(), None);
        assert_eq!(regs.get(4), Some(0x400));
        let values = regs.to_values();
        assert_eq!(values.len(), 17);
        assert_eq!(values[15], 0);
    }

    #[test]
    fn test_unresolved_thread_gives_all_zero_file() {
        let image = MemoryImage::new();
        let regs = FrameTable::new(&GKV4_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.recovered(), 0);
        assert!(regs.to_values().iter().all(|&v| v == 0));
        assert_eq!(regs.len(), 42);
    }

    #[test]
    fn test_aarch64_frame() {
        let mut image = image(&GKV4_LAYOUT);
        for i in 0..10 {
            image.write_le(THREAD + 0x48 + i * 8, 8, 0x1900 + i);
        }
        for i in 0..19 {
            image.write_le(STACK + i * 8, 8, i);
        }
        image.write_le(STACK + 19 * 8, 8, 0x6000_03c5);
        image.write_le(STACK + 20 * 8, 8, 0xffff_0000_0008_1000);
        image.write_le(STACK + 320, 8, 0x2000_0400);
        image.write_le(STACK + 328, 8, 0xffff_0000_0008_2000);

        let regs = FrameTable::new(&GKV4_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.get(19), Some(0x1900));
        assert_eq!(regs.get(28), Some(0x1909));
        assert_eq!(regs.get(18), Some(18));
        assert_eq!(regs.get(41), Some(0x6000_03c5));
        assert_eq!(regs.pc(), Some(0xffff_0000_0008_1000));
        assert_eq!(regs.get(29), Some(0x2000_0400));
        assert_eq!(regs.lr(), Some(0xffff_0000_0008_2000));
        assert_eq!(regs.sp(), Some(STACK));
    }

    #[test]
    fn test_armv7m_sp_wraps_at_32_bits() {
        let mut image = armv7m_thread(0xFFFF_FFFD, 0x0100_0000);
        image.write_le(THREAD + 0x40, 4, 0xFFFF_FFF0);
        let regs = FrameTable::new(&GK_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.pc(), None);
        assert_eq!(regs.sp(), Some(0x10));
    }

    #[test]
    fn test_aarch64_saved_sp_at_top_of_address_space() {
        let mut image = image(&GKV4_LAYOUT);
        image.write_le(THREAD + 0x40, 8, 0xFFFF_FFFF_FFFF_FFF0);
        let regs = FrameTable::new(&GKV4_LAYOUT).reconstruct(&image, ThreadAddr(THREAD));
        assert_eq!(regs.pc(), None);
        assert_eq!(regs.get(29), None);
        assert_eq!(regs.sp(), Some(0xFFFF_FFFF_FFFF_FFF0));
    }
}
