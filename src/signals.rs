// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Per-CPU signals
//!
//! CASS never owns load or capacity figures. Everything it reads about a CPU
//! comes through the [`CpuSignals`] trait, implemented by whoever tracks
//! runqueue state. Implementations may return slightly stale values; the
//! selector never writes through this interface and takes no locks.
//!
//! All utilization and capacity figures share one unit where
//! `SCHED_CAPACITY_SCALE` is the capacity of the biggest CPU at its highest
//! frequency.

use crate::Cpumask;

pub trait CpuSignals {
    /// CPUs that are online and accepting tasks.
    fn active_mask(&self) -> &Cpumask;

    /// CPUs reserved for performance-class (foreground) tasks.
    fn perf_mask(&self) -> &Cpumask;

    /// CPUs reserved for low-power-class (background) tasks.
    fn lp_mask(&self) -> &Cpumask;

    /// Original capacity of @cpu at its maximum frequency.
    fn capacity_orig(&self, cpu: usize) -> u64;

    /// Capacity consumed by real-time tasks on @cpu.
    fn util_rt(&self, cpu: usize) -> u64;

    /// Capacity consumed by deadline tasks on @cpu.
    fn util_dl(&self, cpu: usize) -> u64;

    /// Capacity consumed by interrupt handling on @cpu.
    fn util_irq(&self, cpu: usize) -> u64;

    /// Decayed utilization average of the fair runqueue.
    fn util_avg(&self, cpu: usize) -> u64;

    /// Estimated utilization of the tasks enqueued on the fair runqueue.
    fn util_est(&self, cpu: usize) -> u64;

    /// Decayed load average of the fair runqueue.
    fn load_avg(&self, cpu: usize) -> u64;

    /// Number of runnable tasks on @cpu, including the running one.
    fn nr_running(&self, cpu: usize) -> u32;

    /// True if @cpu has nothing runnable outside the idle class.
    fn is_idle(&self, cpu: usize) -> bool;

    /// True if @cpu is administratively isolated from placement.
    fn is_isolated(&self, cpu: usize) -> bool;

    /// True if the task currently running on @cpu is a real-time task.
    fn curr_is_rt(&self, cpu: usize) -> bool;

    /// Utilization contributed by the task currently running on @cpu.
    fn curr_util(&self, cpu: usize) -> u64;

    /// Capacity of @cpu taken away from fair tasks by higher classes.
    fn stolen_util(&self, cpu: usize) -> u64 {
        self.util_rt(cpu)
            .saturating_add(self.util_dl(cpu))
            .saturating_add(self.util_irq(cpu))
    }
}
