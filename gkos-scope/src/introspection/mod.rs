//! # Kernel Introspection
//!
//! Decoders that turn raw target memory into kernel-level facts. Each one
//! works against [`crate::target::TargetMemory`] and a
//! [`gkos_scope_common::KernelLayout`], and none of them keeps state between
//! snapshots.
//!
//! ## Module Structure
//!
//! - **`topology`**: Scheduler layout, core and priority counts (once per session)
//! - **`ready_queue`**: Thread pointers of one priority level
//! - **`registers`**: Register file of a suspended thread
//! - **`blocking`**: Transitive wait chains
//! - **`runtime`**: Busy-time and utilization figures
//! - **`fields`**: Member, pointer and string reads shared by the above

pub mod blocking;
pub mod fields;
pub mod ready_queue;
pub mod registers;
pub mod runtime;
pub mod topology;

pub use blocking::{BlockReason, BlockingResolver};
pub use fields::FieldReader;
pub use ready_queue::ReadyQueue;
pub use registers::{ContextReconstructor, FrameTable, RegisterFile};
pub use runtime::{ElapsedSource, RuntimeAggregator, RuntimeFigure, RuntimeMode};
pub use topology::{CoreSlot, SchedulerInstance, SchedulerTopology, Topology};
