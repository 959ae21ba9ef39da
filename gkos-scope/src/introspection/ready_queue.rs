//! Thread Enumerator
//!
//! Each priority level of a scheduler owns a vector of thread pointers. The
//! vector's first two words are its `[start, end)` pointers; every slot in
//! between is one runnable thread. Slots are yielded in memory order, which
//! is not necessarily the order the scheduler will pick them in.

use gkos_scope_common::{KernelLayout, MAX_QUEUE_SLOTS};
use log::debug;

use super::fields::indexed;
use crate::domain::{PriorityLevel, QueueError, ReadError, ReadResult, ThreadAddr};
use crate::target::{Expr, TargetMemory};

/// Validated bounds of one ready queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyQueue {
    pub level: PriorityLevel,
    pub start: u64,
    pub end: u64,
    slot_width: u64,
}

impl ReadyQueue {
    /// Read and validate the queue of `level` in the scheduler at `scheduler`
    ///
    /// # Errors
    /// Returns [`QueueError::Unreadable`] if the bounds cannot be read,
    /// [`QueueError::Inverted`] if `end < start`, and
    /// [`QueueError::Oversized`] past [`MAX_QUEUE_SLOTS`]
    pub fn read(
        memory: &dyn TargetMemory,
        layout: &KernelLayout,
        scheduler: u64,
        level: u32,
    ) -> Result<Self, QueueError> {
        let width = layout.pointer_size();
        let unreadable = |source| QueueError::Unreadable { level, source };

        let path = indexed(&layout.scheduler.ready_queue, level);
        let vector = memory
            .evaluate(&Expr::field_address(layout.scheduler.type_name, scheduler, path))
            .map_err(unreadable)?;
        let start = memory.read_word(vector, width).map_err(unreadable)?;
        let end_slot = vector
            .checked_add(width)
            .ok_or(ReadError::Unavailable { addr: vector, len: width * 2 })
            .map_err(unreadable)?;
        let end = memory.read_word(end_slot, width).map_err(unreadable)?;

        Self::from_bounds(PriorityLevel(level), start, end, width)
    }

    /// Validate raw bounds
    ///
    /// # Errors
    /// See [`ReadyQueue::read`]
    pub fn from_bounds(
        level: PriorityLevel,
        start: u64,
        end: u64,
        slot_width: u64,
    ) -> Result<Self, QueueError> {
        if end < start {
            return Err(QueueError::Inverted { level: level.0, start, end });
        }
        let queue = ReadyQueue { level, start, end, slot_width };
        if queue.len() > MAX_QUEUE_SLOTS {
            return Err(QueueError::Oversized { level: level.0, slots: queue.len() });
        }
        Ok(queue)
    }

    /// Number of slots, `(end - start) / pointer size`
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.end - self.start) / self.slot_width
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot values in memory order; an unreadable slot yields its error
    pub fn threads<'m>(
        &self,
        memory: &'m dyn TargetMemory,
    ) -> impl Iterator<Item = ReadResult<ThreadAddr>> + 'm {
        let ReadyQueue { level, start, slot_width, .. } = *self;
        (0..self.len()).map(move |i| {
            let slot = start + i * slot_width;
            let value = memory.read_word(slot, slot_width).map(ThreadAddr);
            debug!("Priority {level} slot 0x{slot:x}: {value:?}");
            value
        })
    }
}
