//! # gkos-scope - Live Thread Introspection for gkos Targets
//!
//! gkos-scope reconstructs the thread table of a halted gkos target from raw
//! memory reads: which threads exist, which core runs which of them, what a
//! blocked thread is waiting for (transitively), each thread's saved register
//! file, and how much CPU time each one consumed. A debugger host calls it on
//! every halt and shows the result as a table.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Debugger Host (or replay binary)                │
//! │           memory reads, expression evaluation, table UI         │
//! └──────────────┬───────────────────────────────▲──────────────────┘
//!                │ TargetMemory                  │ ThreadSink
//!                ▼                               │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      gkos-scope (This Crate)                    │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Session    │──▶│   Snapshot   │──▶│  ThreadRow   │         │
//! │  │ (init/update)│   │   Builder    │   │   (cells)    │         │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘         │
//! │         │                  │                                    │
//! │         ▼                  ▼                                    │
//! │  ┌──────────────┐   ┌──────────────────────────────────────┐    │
//! │  │   Topology   │   │ ReadyQueue · FrameTable · Blocking   │    │
//! │  │   (probe)    │   │ Resolver · RuntimeAggregator         │    │
//! │  └──────────────┘   └──────────────────────────────────────┘    │
//! │                                                                 │
//! │  KernelLayout tables (gkos-scope-common): gk · gkv3 · gkv4      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: Host-facing operations (`init`, `update`, `os_name`,
//!   `context_switch_entry_points`) and the immutable session context
//! - [`introspection`]: Topology probe, ready-queue enumeration, register
//!   reconstruction, wait-chain resolution, runtime aggregation
//! - [`snapshot`]: One pass over the target into rows, and the sink contract
//! - [`target`]: The memory facade trait, a dump-backed implementation and
//!   a synthetic kernel builder
//! - [`export`]: JSON export of snapshots
//! - [`cli`]: Arguments of the replay binary
//! - [`domain`]: Core domain types and errors
//!
//! ## Failure Model
//!
//! Only [`session::Session::init`] can fail, when the scheduler topology
//! cannot be determined. Every later failure is contained in the smallest
//! unit that owns it: one field (sentinel value), one thread row, or one
//! priority level (malformed queue).
//!
//! ## Typical Usage
//!
//! ```bash
//! # Decode a recorded dump, adding symbols from the firmware
//! gkos-scope --image dump.json --elf firmware.elf
//!
//! # Synthetic dual-core target, exported as JSON
//! gkos-scope --demo gkv3 --export rows.json
//! ```

pub mod cli;
pub mod domain;
pub mod export;
pub mod introspection;
pub mod session;
pub mod snapshot;
pub mod target;
