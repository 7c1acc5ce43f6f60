// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CASS Topology
//!
//! CASS narrows placement to one of two CPU tiers before comparing CPUs:
//! performance CPUs for foreground tasks and low-power CPUs for everything
//! else. On Android those partitions come from the platform; when nothing
//! provides them they are derived from CPU capacities here. The CPUs with
//! the highest capacity are the performance tier and the rest are the
//! low-power tier. A homogeneous system has a single tier spanning all CPUs.
//!
//! Capacities are read from sysfs:
//!
//!```no_run
//!     use scx_cass::Topology;
//!     let top = Topology::new().unwrap();
//!     println!("perf={} lp={}", top.perf_mask(), top.lp_mask());
//!```
//!
//! `cpuN/cpu_capacity` only exists on architectures that describe asymmetric
//! CPUs. Where it is missing every CPU gets `SCHED_CAPACITY_SCALE`.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;

use crate::snapshot::CpuState;
use crate::snapshot::SystemSnapshot;
use crate::Cpumask;
use crate::SCHED_CAPACITY_SCALE;

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Split CPUs into the performance and low-power tiers by capacity.
pub fn tiers(capacities: &[u64]) -> Result<(Cpumask, Cpumask)> {
    let max_cap = match capacities.iter().max() {
        Some(cap) => *cap,
        None => bail!("No CPU capacities to derive tiers from"),
    };

    let mut perf = Cpumask::new();
    let mut lp = Cpumask::new();
    for (cpu, cap) in capacities.iter().enumerate() {
        if *cap == max_cap {
            perf.set_cpu(cpu)?;
        } else {
            lp.set_cpu(cpu)?;
        }
    }

    if lp.is_empty() {
        lp = perf;
    }
    Ok((perf, lp))
}

#[derive(Debug, Clone)]
pub struct Topology {
    online: Cpumask,
    capacities: Vec<u64>,
    perf: Cpumask,
    lp: Cpumask,
}

impl Topology {
    /// Build a Topology from the host's sysfs.
    pub fn new() -> Result<Topology> {
        Self::from_sysfs(SYSFS_CPU_ROOT)
    }

    /// Build a Topology from a sysfs CPU directory laid out like
    /// /sys/devices/system/cpu.
    pub fn from_sysfs<P: AsRef<Path>>(root: P) -> Result<Topology> {
        let root = root.as_ref();
        let online = read_mask(&root.join("online"))?;
        let possible = match read_mask(&root.join("possible")) {
            Ok(mask) => mask,
            Err(e) => {
                debug!("Falling back to online CPUs: {:#}", e);
                online
            }
        };

        let nr_cpus = match possible.or(&online).last() {
            Some(cpu) => cpu + 1,
            None => bail!("No CPUs found under {}", root.display()),
        };

        let mut capacities = Vec::with_capacity(nr_cpus);
        for cpu in 0..nr_cpus {
            capacities.push(read_capacity(root, cpu)?);
        }

        Self::from_capacities(online, capacities)
    }

    /// Build a Topology from known capacities. @online must only reference
    /// CPUs that have a capacity.
    pub fn from_capacities(online: Cpumask, capacities: Vec<u64>) -> Result<Topology> {
        if !online.is_subset(&Cpumask::first_n(capacities.len())?) {
            bail!(
                "Online CPUs {} exceed the {} CPUs with a capacity",
                online.to_cpulist(),
                capacities.len()
            );
        }
        let (perf, lp) = tiers(&capacities)?;
        Ok(Self {
            online,
            capacities,
            perf,
            lp,
        })
    }

    pub fn nr_cpus(&self) -> usize {
        self.capacities.len()
    }

    pub fn online(&self) -> &Cpumask {
        &self.online
    }

    pub fn capacity(&self, cpu: usize) -> Option<u64> {
        self.capacities.get(cpu).copied()
    }

    pub fn perf_mask(&self) -> &Cpumask {
        &self.perf
    }

    pub fn lp_mask(&self) -> &Cpumask {
        &self.lp
    }

    /// True if CPUs differ in capacity.
    pub fn is_asymmetric(&self) -> bool {
        self.perf != self.lp
    }

    /// An idle system with this topology's capacities, useful as the base
    /// for synthetic scenarios.
    pub fn idle_snapshot(&self) -> Result<SystemSnapshot> {
        SystemSnapshot::builder()
            .cpus(self.capacities.iter().map(|cap| CpuState::idle(*cap)))
            .active(self.online)
            .perf(self.perf)
            .lp(self.lp)
            .build()
    }
}

fn read_mask(path: &Path) -> Result<Cpumask> {
    let list = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Cpumask::from_cpulist(&list).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_capacity(root: &Path, cpu: usize) -> Result<u64> {
    let path: PathBuf = root.join(format!("cpu{}", cpu)).join("cpu_capacity");
    match fs::read_to_string(&path) {
        Ok(val) => val
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(_) => {
            debug!("CPU {} has no cpu_capacity, assuming {}", cpu, SCHED_CAPACITY_SCALE);
            Ok(SCHED_CAPACITY_SCALE)
        }
    }
}
