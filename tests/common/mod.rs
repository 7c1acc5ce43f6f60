// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
#![allow(dead_code)]

use scx_cass::CpuState;
use scx_cass::Cpumask;
use scx_cass::SystemSnapshot;
use scx_cass::Task;

/// Small deterministic generator so sweeps are reproducible from a seed.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in [lo, hi].
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next_u64() % (hi - lo + 1)
    }

    pub fn chance(&mut self, pct: u64) -> bool {
        self.next_u64() % 100 < pct
    }
}

pub const CAPACITIES: [u64; 4] = [160, 512, 768, 1024];

/// A busy CPU with random figures, never idle.
pub fn random_busy_cpu(rng: &mut XorShift) -> CpuState {
    let capacity = CAPACITIES[rng.range(0, 3) as usize];
    CpuState {
        capacity,
        util_avg: rng.range(0, 1200),
        util_est: if rng.chance(30) { rng.range(0, 1200) } else { 0 },
        load_avg: rng.range(0, 3000),
        util_rt: if rng.chance(20) { rng.range(0, 300) } else { 0 },
        util_dl: if rng.chance(10) { rng.range(0, 100) } else { 0 },
        util_irq: if rng.chance(20) { rng.range(0, 200) } else { 0 },
        nr_running: rng.range(2, 6) as u32,
        idle: false,
        isolated: rng.chance(10),
        curr_rt: rng.chance(10),
        curr_util: rng.range(0, 400),
    }
}

pub fn random_mask(rng: &mut XorShift, nr_cpus: usize, pct: u64) -> Cpumask {
    let mut mask = Cpumask::new();
    for cpu in 0..nr_cpus {
        if rng.chance(pct) {
            mask.set_cpu(cpu).unwrap();
        }
    }
    mask
}

/// A random non-empty allowed mask.
pub fn random_allowed(rng: &mut XorShift, nr_cpus: usize) -> Cpumask {
    let mut mask = random_mask(rng, nr_cpus, 50);
    if mask.is_empty() {
        mask.set_cpu(rng.range(0, nr_cpus as u64 - 1) as usize).unwrap();
    }
    mask
}

pub fn random_task(rng: &mut XorShift, nr_cpus: usize) -> Task {
    let allowed = random_allowed(rng, nr_cpus);
    let mut task = Task::new(rng.range(1, 32768) as i32, allowed);
    task.oom_score_adj = rng.range(0, 1000) as i32 - 100;
    task.cpu = rng.range(0, nr_cpus as u64 - 1) as usize;
    task.queued = rng.chance(30);
    task.util_avg = rng.range(0, 800);
    task.util_est = rng.range(0, 800);
    task.load_avg = rng.range(0, 1500);
    task
}

/// Busy CPUs with the given capacities and utilizations, tiers disabled.
pub fn busy_system(cpus: &[(u64, u64)]) -> SystemSnapshot {
    let states: Vec<CpuState> = cpus
        .iter()
        .map(|(cap, util)| CpuState::busy(*cap, *util))
        .collect();
    let span = Cpumask::first_n(states.len()).unwrap();
    SystemSnapshot::builder()
        .cpus(states)
        .perf(span)
        .lp(span)
        .build()
        .unwrap()
}

pub fn all_cpus(nr_cpus: usize) -> Cpumask {
    Cpumask::first_n(nr_cpus).unwrap()
}

/// @cpus as given, one tier spanning all of them.
pub fn flat_system(cpus: Vec<CpuState>) -> SystemSnapshot {
    let span = Cpumask::first_n(cpus.len()).unwrap();
    SystemSnapshot::builder()
        .cpus(cpus)
        .perf(span)
        .lp(span)
        .build()
        .unwrap()
}
