// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! scx_cass: Capacity Aware Superset Scheduler CPU selection.
//!
//! The selector lives in [`cass`]. It reads per-CPU figures through the
//! [`CpuSignals`] trait, so it can run against the kernel's runqueues or,
//! as in this crate, against a [`SystemSnapshot`] loaded from a scenario
//! file.
#[macro_use]
extern crate static_assertions;

pub mod cass;
pub mod config;
pub mod cpumask;
pub mod scenario;
pub mod signals;
pub mod snapshot;
pub mod stats;
pub mod task;
pub mod topology;

pub use cass::Cass;
pub use cass::Decision;
pub use cass::Placement;
pub use config::AdjRange;
pub use config::CassConfig;
pub use config::Policy;
pub use cpumask::Cpumask;
pub use scenario::Scenario;
pub use signals::CpuSignals;
pub use snapshot::CpuState;
pub use snapshot::SystemSnapshot;
pub use stats::PlacementStats;
pub use task::Task;
pub use task::TaskClass;
pub use task::WakeCtx;
pub use task::WakeReason;
pub use topology::Topology;

/// Capacity of the biggest CPU at its highest frequency. Utilization and
/// capacity figures are all expressed in this unit.
pub const SCHED_CAPACITY_SCALE: u64 = 1024;

/// Width of a Cpumask.
pub const MAX_CPUS: usize = 512;

const_assert!(MAX_CPUS % 64 == 0);
const_assert!(SCHED_CAPACITY_SCALE.is_power_of_two());
