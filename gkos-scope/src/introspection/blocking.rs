//! # Blocking Chain Resolver
//!
//! Answers "what is this thread waiting for" and, when the answer is another
//! thread, keeps following the chain so the host can show who ultimately
//! holds things up:
//!
//! ```text
//! net_rx(disk_io(until 1500ms))            net_rx waits on disk_io, which sleeps
//! queue @20003400 OR until 12.000000000s   either wakes the thread
//! ```
//!
//! ## Termination
//!
//! The wait graph lives in target memory and may be cyclic or corrupt. The
//! walk is a loop over an explicit visited set and stops at whichever comes
//! first:
//!
//! - a thread waiting on itself ([`BlockReason::SelfBlockError`])
//! - a thread already on the chain ([`BlockReason::Cycle`])
//! - [`MAX_CHAIN_DEPTH`] levels or the character budget ([`BlockReason::Truncated`])
//!
//! The rendered text is additionally clipped to the budget.

use gkos_scope_common::{
    DeadlineLayout, KernelLayout, PrimitiveKind, TimeUnit, WaitLayout, WaitTag, MAX_CHAIN_DEPTH,
    WAIT_TAG_MASK,
};
use serde::Serialize;
use std::collections::HashSet;

use super::fields::FieldReader;
use crate::domain::{Deadline, ReadResult, ThreadAddr};

/// Marker shown when a chain is cut short
const ELLIPSIS: &str = "...";

/// What a thread is waiting for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    /// Not blocking
    None,
    /// Waiting on another thread, which may itself be waiting
    OnThread {
        thread: ThreadAddr,
        name: Option<String>,
        nested: Box<BlockReason>,
    },
    /// Waiting on a synchronization primitive
    OnPrimitive { kind: PrimitiveKind, address: u64 },
    /// Sleeping until a deadline
    OnTimeout(Deadline),
    /// Any of these wakes the thread
    Combined(Vec<BlockReason>),
    /// Thread records itself as the thread it waits on
    SelfBlockError(ThreadAddr),
    /// Blocking flag set but nothing recorded to wait on
    Indeterminate,
    /// Chain returned to a thread already visited
    Cycle(ThreadAddr),
    /// Chain cut at the depth or length bound
    Truncated,
}

impl BlockReason {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, BlockReason::None)
    }

    /// Human-readable chain clipped to `budget` characters
    #[must_use]
    pub fn render(&self, budget: usize) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        clip(out, budget)
    }

    fn write_into(&self, out: &mut String) {
        match self {
            BlockReason::None => {}
            BlockReason::OnThread { thread, name, nested } => {
                match name {
                    Some(name) if !name.is_empty() => out.push_str(name),
                    _ => out.push_str(&thread.to_string()),
                }
                if !nested.is_none() {
                    out.push('(');
                    nested.write_into(out);
                    out.push(')');
                }
            }
            BlockReason::OnPrimitive { kind, address } => {
                out.push_str(&format!("{} @{address:x}", kind.label()));
            }
            BlockReason::OnTimeout(deadline) => out.push_str(&format!("until {deadline}")),
            BlockReason::Combined(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" OR ");
                    }
                    part.write_into(out);
                }
            }
            BlockReason::SelfBlockError(_) => out.push_str("<self-block>"),
            BlockReason::Indeterminate => out.push('*'),
            BlockReason::Cycle(_) => out.push_str("<cycle>"),
            BlockReason::Truncated => out.push_str(ELLIPSIS),
        }
    }
}

fn clip(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text;
    }
    let keep = budget.saturating_sub(ELLIPSIS.len());
    let mut clipped: String = text.chars().take(keep).collect();
    clipped.push_str(&ELLIPSIS[..budget.min(ELLIPSIS.len())]);
    clipped
}

/// Wait state of one thread, before its target thread is resolved
#[derive(Debug, Default)]
struct WaitLevel {
    blocking: bool,
    thread: Option<ThreadAddr>,
    primitive: Option<(PrimitiveKind, u64)>,
    deadline: Option<Deadline>,
    /// Name of `thread`, filled in while walking
    target_name: Option<String>,
}

/// Follows wait chains through target memory
pub struct BlockingResolver<'a> {
    fields: FieldReader<'a>,
    budget: usize,
}

impl<'a> BlockingResolver<'a> {
    #[must_use]
    pub fn new(fields: FieldReader<'a>, budget: usize) -> Self {
        Self { fields, budget }
    }

    /// Resolve the full chain starting at `thread`
    ///
    /// # Errors
    /// Returns an error only if the starting thread's blocking flag is
    /// unreadable; failures further down end the chain instead
    pub fn resolve(&self, thread: ThreadAddr) -> ReadResult<BlockReason> {
        let first = self.read_level(thread)?;
        if !first.blocking {
            return Ok(BlockReason::None);
        }

        let mut visited = HashSet::from([thread]);
        let mut levels = vec![(thread, first)];
        let mut spent = 0usize;

        let tail = loop {
            let Some((current, level)) = levels.last_mut() else {
                break BlockReason::None;
            };
            let Some(next) = level.thread.filter(|next| *next != *current) else {
                break BlockReason::None;
            };

            let name = self.fields.thread_name(next).ok();
            spent += name.as_ref().map_or(10, String::len) + 2;
            level.target_name = name;

            if visited.contains(&next) {
                break BlockReason::Cycle(next);
            }
            if levels.len() >= MAX_CHAIN_DEPTH || spent >= self.budget {
                break BlockReason::Truncated;
            }
            visited.insert(next);

            match self.read_level(next) {
                Ok(level) if level.blocking => levels.push((next, level)),
                _ => break BlockReason::None,
            }
        };

        // Fold from the innermost level outwards
        let mut nested = tail;
        for (addr, level) in levels.into_iter().rev() {
            let target = match level.thread {
                Some(next) if next == addr => Some(BlockReason::SelfBlockError(addr)),
                Some(next) => Some(BlockReason::OnThread {
                    thread: next,
                    name: level.target_name.clone(),
                    nested: Box::new(std::mem::replace(&mut nested, BlockReason::None)),
                }),
                None => None,
            };
            nested = combine(target, &level);
        }
        Ok(nested)
    }

    fn read_level(&self, thread: ThreadAddr) -> ReadResult<WaitLevel> {
        let layout: &KernelLayout = self.fields.layout();
        if !self.fields.thread_flag(thread, layout.thread.is_blocking)? {
            return Ok(WaitLevel::default());
        }

        let pointer = |path: &str| self.fields.thread_value(thread, path).ok().filter(|&p| p != 0);
        let mut level = WaitLevel { blocking: true, ..WaitLevel::default() };
        match layout.thread.wait {
            WaitLayout::Untagged { thread: path } => {
                level.thread = pointer(path).map(ThreadAddr);
            }
            WaitLayout::Tagged { target } => {
                if let Some(value) = pointer(target) {
                    match WaitTag::from_pointer(value) {
                        WaitTag::Thread => level.thread = Some(ThreadAddr(value)),
                        WaitTag::Primitive(kind) => {
                            level.primitive = Some((kind, value & !WAIT_TAG_MASK));
                        }
                    }
                }
            }
            WaitLayout::Split { thread: thread_path, primitive } => {
                level.thread = pointer(thread_path).map(ThreadAddr);
                level.primitive = pointer(primitive).map(|p| (PrimitiveKind::Unspecified, p));
            }
        }

        level.deadline = match layout.thread.deadline {
            DeadlineLayout::Scalar { path, unit } => pointer(path).map(|v| match unit {
                TimeUnit::Millis => Deadline::Millis(v),
                TimeUnit::Micros => Deadline::Micros(v),
            }),
            DeadlineLayout::SecondsNanos { seconds, nanos } => {
                let secs = self.fields.thread_value(thread, seconds).unwrap_or(0);
                let nanos = self.fields.thread_value(thread, nanos).unwrap_or(0);
                (secs != 0 || nanos != 0).then_some(Deadline::Timespec { secs, nanos })
            }
        };
        Ok(level)
    }
}

/// Join a level's thread target with its primitive and deadline
fn combine(target: Option<BlockReason>, level: &WaitLevel) -> BlockReason {
    let mut parts: Vec<BlockReason> = target.into_iter().collect();
    if let Some((kind, address)) = level.primitive {
        parts.push(BlockReason::OnPrimitive { kind, address });
    }
    if let Some(deadline) = level.deadline {
        parts.push(BlockReason::OnTimeout(deadline));
    }
    match parts.len() {
        0 if level.blocking => BlockReason::Indeterminate,
        0 => BlockReason::None,
        1 => parts.remove(0),
        _ => BlockReason::Combined(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_nested_chain() {
        let reason = BlockReason::OnThread {
            thread: ThreadAddr(0x1000),
            name: Some("disk_io".into()),
            nested: Box::new(BlockReason::OnTimeout(Deadline::Millis(1500))),
        };
        assert_eq!(reason.render(64), "disk_io(until 1500ms)");
    }

    #[test]
    fn test_render_combined_and_markers() {
        let reason = BlockReason::Combined(vec![
            BlockReason::OnPrimitive { kind: PrimitiveKind::Queue, address: 0x2000_3400 },
            BlockReason::OnTimeout(Deadline::Timespec { secs: 12, nanos: 0 }),
        ]);
        assert_eq!(reason.render(64), "queue @20003400 OR until 12.000000000s");
        assert_eq!(BlockReason::Indeterminate.render(64), "*");
        assert_eq!(BlockReason::SelfBlockError(ThreadAddr(1)).render(64), "<self-block>");
        assert_eq!(BlockReason::None.render(64), "");
    }

    #[test]
    fn test_unnamed_thread_renders_address() {
        let reason = BlockReason::OnThread {
            thread: ThreadAddr(0x3800_1200),
            name: None,
            nested: Box::new(BlockReason::None),
        };
        assert_eq!(reason.render(64), "0x38001200");
    }

    #[test]
    fn test_clip_respects_budget() {
        let long = "x".repeat(100);
        let clipped = clip(long, 64);
        assert_eq!(clipped.chars().count(), 64);
        assert!(clipped.ends_with("..."));
        assert_eq!(clip("short".into(), 64), "short");
        assert_eq!(clip("abcdef".into(), 2), "..");
    }
}
