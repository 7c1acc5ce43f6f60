// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use anyhow::bail;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::signals::CpuSignals;
use crate::topology;
use crate::Cpumask;
use crate::MAX_CPUS;
use crate::SCHED_CAPACITY_SCALE;

/// Runqueue figures for one CPU at the moment the snapshot was taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuState {
    pub capacity: u64,
    pub util_avg: u64,
    pub util_est: u64,
    pub load_avg: u64,
    pub util_rt: u64,
    pub util_dl: u64,
    pub util_irq: u64,
    pub nr_running: u32,
    pub idle: bool,
    pub isolated: bool,
    pub curr_rt: bool,
    pub curr_util: u64,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            capacity: SCHED_CAPACITY_SCALE,
            util_avg: 0,
            util_est: 0,
            load_avg: 0,
            util_rt: 0,
            util_dl: 0,
            util_irq: 0,
            nr_running: 0,
            idle: false,
            isolated: false,
            curr_rt: false,
            curr_util: 0,
        }
    }
}

impl CpuState {
    /// A busy CPU of @capacity whose fair runqueue carries @util.
    pub fn busy(capacity: u64, util: u64) -> Self {
        Self {
            capacity,
            util_avg: util,
            load_avg: util,
            nr_running: 1,
            ..Default::default()
        }
    }

    /// An idle CPU of @capacity.
    pub fn idle(capacity: u64) -> Self {
        Self {
            capacity,
            idle: true,
            ..Default::default()
        }
    }
}

/// A frozen view of every CPU, usable wherever live runqueue signals are
/// expected.
#[derive(Clone, Debug)]
pub struct SystemSnapshot {
    cpus: Vec<CpuState>,
    active: Cpumask,
    perf: Cpumask,
    lp: Cpumask,
}

impl SystemSnapshot {
    /// All CPUs active, tiers derived from capacities.
    pub fn new(cpus: Vec<CpuState>) -> Result<Self> {
        SnapshotBuilder::new().cpus(cpus).build()
    }

    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, cpu: usize) -> Option<&CpuState> {
        self.cpus.get(cpu)
    }

    pub fn cpus(&self) -> &[CpuState] {
        &self.cpus
    }

    /// Mask of every CPU in the snapshot.
    pub fn span(&self) -> Cpumask {
        // Validated against MAX_CPUS at build time.
        Cpumask::first_n(self.cpus.len()).unwrap_or_default()
    }

    fn read<T>(&self, cpu: usize, f: impl FnOnce(&CpuState) -> T, dflt: T) -> T {
        self.cpus.get(cpu).map_or(dflt, f)
    }
}

impl CpuSignals for SystemSnapshot {
    fn active_mask(&self) -> &Cpumask {
        &self.active
    }

    fn perf_mask(&self) -> &Cpumask {
        &self.perf
    }

    fn lp_mask(&self) -> &Cpumask {
        &self.lp
    }

    fn capacity_orig(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.capacity, 0)
    }

    fn util_rt(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.util_rt, 0)
    }

    fn util_dl(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.util_dl, 0)
    }

    fn util_irq(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.util_irq, 0)
    }

    fn util_avg(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.util_avg, 0)
    }

    fn util_est(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.util_est, 0)
    }

    fn load_avg(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.load_avg, 0)
    }

    fn nr_running(&self, cpu: usize) -> u32 {
        self.read(cpu, |c| c.nr_running, 0)
    }

    fn is_idle(&self, cpu: usize) -> bool {
        self.read(cpu, |c| c.idle, false)
    }

    fn is_isolated(&self, cpu: usize) -> bool {
        self.read(cpu, |c| c.isolated, true)
    }

    fn curr_is_rt(&self, cpu: usize) -> bool {
        self.read(cpu, |c| c.curr_rt, false)
    }

    fn curr_util(&self, cpu: usize) -> u64 {
        self.read(cpu, |c| c.curr_util, 0)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    cpus: Vec<CpuState>,
    active: Option<Cpumask>,
    perf: Option<Cpumask>,
    lp: Option<Cpumask>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu(mut self, cpu: CpuState) -> Self {
        self.cpus.push(cpu);
        self
    }

    pub fn cpus(mut self, cpus: impl IntoIterator<Item = CpuState>) -> Self {
        self.cpus.extend(cpus);
        self
    }

    /// Defaults to every CPU.
    pub fn active(mut self, mask: Cpumask) -> Self {
        self.active = Some(mask);
        self
    }

    /// Defaults to the CPUs with the highest capacity.
    pub fn perf(mut self, mask: Cpumask) -> Self {
        self.perf = Some(mask);
        self
    }

    /// Defaults to every CPU outside the performance tier.
    pub fn lp(mut self, mask: Cpumask) -> Self {
        self.lp = Some(mask);
        self
    }

    pub fn build(self) -> Result<SystemSnapshot> {
        let nr_cpus = self.cpus.len();
        if nr_cpus == 0 {
            bail!("Snapshot has no CPUs");
        }
        if nr_cpus > MAX_CPUS {
            bail!("Snapshot has {} CPUs, max {}", nr_cpus, MAX_CPUS);
        }
        let span = Cpumask::first_n(nr_cpus)?;

        let capacities: Vec<u64> = self.cpus.iter().map(|c| c.capacity).collect();
        let (dflt_perf, dflt_lp) = topology::tiers(&capacities)?;

        let active = self.active.unwrap_or(span);
        let perf = self.perf.unwrap_or(dflt_perf);
        let lp = self.lp.unwrap_or(dflt_lp);

        for (name, mask) in [("active", &active), ("perf", &perf), ("lp", &lp)] {
            if !mask.is_subset(&span) {
                bail!(
                    "{} mask {} references CPUs beyond the {} in the snapshot",
                    name,
                    mask.to_cpulist(),
                    nr_cpus
                );
            }
        }

        Ok(SystemSnapshot {
            cpus: self.cpus,
            active,
            perf,
            lp,
        })
    }
}
