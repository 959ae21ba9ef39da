//! # Topology Adapter
//!
//! Works out, once per session, which scheduler layout the firmware was built
//! with and how many cores and priority levels it serves.
//!
//! ## Probe Order
//!
//! 1. `scheds` - one scheduler per core ([`SchedulerTopology::Amp`]); each
//!    instance tracks its own core in `current_thread[0]`
//! 2. `sched` - one scheduler shared by all cores
//!    ([`SchedulerTopology::SmpShared`]); `current_thread[n]` is core `n`
//! 3. `s` - single-core build ([`SchedulerTopology::Unified`])
//!
//! `gk_ncores` and `gk_nprio` are optional exports; when absent the
//! generation's defaults apply. If none of the scheduler symbols resolves the
//! session cannot start.

use gkos_scope_common::{KernelLayout, DEFAULT_CORE_COUNT};
use log::{debug, info};
use serde::Serialize;
use std::fmt;

use crate::domain::{ConfigError, CoreId};
use crate::snapshot::Column;
use crate::target::{Expr, TargetMemory};

/// Upper bound accepted from `gk_ncores`
const MAX_CORES: u64 = 64;

/// Upper bound accepted from `gk_nprio`
const MAX_PRIORITIES: u64 = 256;

/// Scheduler layout variant found in the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerTopology {
    /// One global scheduler, single core
    Unified,
    /// One independent scheduler instance per core
    Amp,
    /// One scheduler instance with a current-thread slot per core
    SmpShared,
}

impl SchedulerTopology {
    /// Global symbol holding the scheduler object(s) for this variant
    #[must_use]
    pub fn symbol(self, layout: &KernelLayout) -> &'static str {
        match self {
            SchedulerTopology::Unified => layout.probes.unified,
            SchedulerTopology::Amp => layout.probes.per_core_array,
            SchedulerTopology::SmpShared => layout.probes.shared,
        }
    }

    /// Probe order at session start
    pub const PROBE_ORDER: [SchedulerTopology; 3] =
        [SchedulerTopology::Amp, SchedulerTopology::SmpShared, SchedulerTopology::Unified];
}

impl fmt::Display for SchedulerTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerTopology::Unified => f.write_str("unified"),
            SchedulerTopology::Amp => f.write_str("amp"),
            SchedulerTopology::SmpShared => f.write_str("smp-shared"),
        }
    }
}

/// A core served by a scheduler instance and the slot it occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoreSlot {
    pub core: CoreId,
    /// Index into the instance's `current_thread` array
    pub slot: u32,
}

/// One scheduler object in target memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerInstance {
    pub address: u64,
    /// Set for per-core instances, shown in the Core column
    pub owner: Option<CoreId>,
    pub cores: Vec<CoreSlot>,
}

/// Resolved scheduler configuration, immutable for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub kind: SchedulerTopology,
    pub core_count: u32,
    pub priority_count: u32,
    pub instances: Vec<SchedulerInstance>,
}

impl Topology {
    /// Probe the target's globals
    ///
    /// # Errors
    /// Returns [`ConfigError::SchedulerNotFound`] if no scheduler symbol
    /// resolves, and [`ConfigError::ImplausibleCount`] if an exported count
    /// is zero or absurdly large
    pub fn probe(memory: &dyn TargetMemory, layout: &KernelLayout) -> Result<Self, ConfigError> {
        let probes = &layout.probes;
        let core_count = probe_count(memory, probes.core_count, "core count", MAX_CORES)?
            .unwrap_or(DEFAULT_CORE_COUNT);
        let priority_count =
            probe_count(memory, probes.priority_count, "priority count", MAX_PRIORITIES)?
                .unwrap_or(layout.default_priority_count);

        let Some(kind) = SchedulerTopology::PROBE_ORDER
            .into_iter()
            .find(|kind| memory.evaluate(&Expr::address_of(kind.symbol(layout))).is_ok())
        else {
            return Err(ConfigError::SchedulerNotFound {
                tried: SchedulerTopology::PROBE_ORDER
                    .iter()
                    .map(|kind| kind.symbol(layout).to_string())
                    .collect(),
            });
        };

        let symbol = kind.symbol(layout);
        let (core_count, instances) = match kind {
            SchedulerTopology::Amp => {
                let instances = (0..core_count)
                    .map(|index| {
                        let address = memory
                            .evaluate(&Expr::address_of(format!("{symbol}[{index}]")))
                            .map_err(|_| ConfigError::SchedulerInstanceUnresolved {
                                symbol: symbol.to_string(),
                                index,
                            })?;
                        Ok(SchedulerInstance {
                            address,
                            owner: Some(CoreId(index)),
                            cores: vec![CoreSlot { core: CoreId(index), slot: 0 }],
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                (core_count, instances)
            }
            SchedulerTopology::SmpShared => {
                let address = resolve_single(memory, symbol)?;
                let cores =
                    (0..core_count).map(|c| CoreSlot { core: CoreId(c), slot: c }).collect();
                (core_count, vec![SchedulerInstance { address, owner: None, cores }])
            }
            SchedulerTopology::Unified => {
                let address = resolve_single(memory, symbol)?;
                let cores = vec![CoreSlot { core: CoreId(0), slot: 0 }];
                (1, vec![SchedulerInstance { address, owner: None, cores }])
            }
        };

        for instance in &instances {
            debug!(
                "Scheduler instance at 0x{:x} serves {} core(s)",
                instance.address,
                instance.cores.len()
            );
        }
        info!(
            "Scheduler topology: {kind} via `{symbol}`, {core_count} core(s), \
             {priority_count} priority level(s)"
        );

        Ok(Topology { kind, core_count, priority_count, instances })
    }

    /// Column schema for this topology
    #[must_use]
    pub fn columns(&self) -> Vec<Column> {
        Column::ALL
            .into_iter()
            .filter(|column| *column != Column::Core || self.kind == SchedulerTopology::Amp)
            .collect()
    }

    /// Status values for the host's color legend
    #[must_use]
    pub fn status_legend(&self) -> Vec<String> {
        let mut legend = vec!["waiting".to_string()];
        legend.extend((0..self.core_count).map(|c| format!("exec core {c}")));
        legend.push("blocking".to_string());
        legend.push("deleted".to_string());
        legend
    }
}

fn resolve_single(memory: &dyn TargetMemory, symbol: &str) -> Result<u64, ConfigError> {
    memory
        .evaluate(&Expr::address_of(symbol))
        .map_err(|_| ConfigError::SchedulerInstanceUnresolved {
            symbol: symbol.to_string(),
            index: 0,
        })
}

/// Read an optional count export; absent is `None`, out of range is an error
fn probe_count(
    memory: &dyn TargetMemory,
    symbol: &str,
    what: &'static str,
    max: u64,
) -> Result<Option<u32>, ConfigError> {
    let Ok(value) = memory.evaluate(&Expr::value(symbol)) else {
        debug!("`{symbol}` not exported, using default {what}");
        return Ok(None);
    };
    if value == 0 || value > max {
        return Err(ConfigError::ImplausibleCount { symbol: symbol.to_string(), what, value });
    }
    u32::try_from(value)
        .map(Some)
        .map_err(|_| ConfigError::ImplausibleCount { symbol: symbol.to_string(), what, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{MemoryImage, SymbolInfo, TypeLayout};
    use gkos_scope_common::{GKV3_LAYOUT, GKV4_LAYOUT, GK_LAYOUT};

    fn image_with_scheduler(symbol: &str) -> MemoryImage {
        let mut image = MemoryImage::new();
        image.define_type("Scheduler", TypeLayout { size: 0x100, ..TypeLayout::default() });
        image.define_symbol(
            symbol,
            SymbolInfo { address: 0x2000_0000, size: 0, ty: Some("Scheduler".into()) },
        );
        image
    }

    fn export_count(image: &mut MemoryImage, symbol: &str, address: u64, value: u64) {
        image.define_symbol(symbol, SymbolInfo { address, size: 4, ty: None });
        image.write_le(address, 4, value);
    }

    #[test]
    fn test_missing_scheduler_is_config_error() {
        let image = MemoryImage::new();
        let err = Topology::probe(&image, &GKV4_LAYOUT).unwrap_err();
        assert_eq!(
            err,
            ConfigError::SchedulerNotFound {
                tried: vec!["scheds".into(), "sched".into(), "s".into()]
            }
        );
    }

    #[test]
    fn test_amp_instances_and_core_column() {
        let mut image = image_with_scheduler("scheds");
        export_count(&mut image, "gk_ncores", 0x1000, 2);
        let topology = Topology::probe(&image, &GKV3_LAYOUT).unwrap();
        assert_eq!(topology.kind, SchedulerTopology::Amp);
        assert_eq!(topology.instances.len(), 2);
        assert_eq!(topology.instances[1].address, 0x2000_0100);
        assert_eq!(topology.instances[1].cores, vec![CoreSlot { core: CoreId(1), slot: 0 }]);
        assert_eq!(topology.priority_count, 10);
        assert!(topology.columns().contains(&Column::Core));
    }

    #[test]
    fn test_smp_shared_defaults_and_no_core_column() {
        let image = image_with_scheduler("sched");
        let topology = Topology::probe(&image, &GKV4_LAYOUT).unwrap();
        assert_eq!(topology.kind, SchedulerTopology::SmpShared);
        assert_eq!(topology.core_count, DEFAULT_CORE_COUNT);
        assert_eq!(topology.priority_count, 5);
        assert_eq!(topology.instances.len(), 1);
        assert_eq!(topology.instances[0].cores.len(), 2);
        assert!(!topology.columns().contains(&Column::Core));
    }

    #[test]
    fn test_unified_is_single_core() {
        let mut image = image_with_scheduler("s");
        export_count(&mut image, "gk_nprio", 0x1000, 7);
        let topology = Topology::probe(&image, &GK_LAYOUT).unwrap();
        assert_eq!(topology.kind, SchedulerTopology::Unified);
        assert_eq!(topology.core_count, 1);
        assert_eq!(topology.priority_count, 7);
        assert_eq!(topology.status_legend(), vec!["waiting", "exec core 0", "blocking", "deleted"]);
    }

    #[test]
    fn test_zero_priority_count_is_rejected() {
        let mut image = image_with_scheduler("sched");
        export_count(&mut image, "gk_nprio", 0x1000, 0);
        let err = Topology::probe(&image, &GKV4_LAYOUT).unwrap_err();
        assert!(matches!(err, ConfigError::ImplausibleCount { value: 0, .. }));
    }
}
