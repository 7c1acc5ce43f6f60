// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use serde::Deserialize;
use serde::Serialize;

use crate::Cpumask;

/// Scheduling class of a task. Only fair tasks carry per-entity load
/// tracking; real-time and deadline tasks are placed on their estimated
/// utilization alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    #[default]
    Fair,
    Rt,
    Dl,
}

impl TaskClass {
    pub fn is_rt(&self) -> bool {
        !matches!(self, TaskClass::Fair)
    }
}

/// The event that triggered a placement decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeReason {
    /// A freshly forked child.
    Fork,
    /// The task is replacing its process image.
    Exec,
    /// The waker is about to stop running and hands the CPU off.
    Sync,
    #[default]
    Wakeup,
}

/// Everything about the calling context that placement needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WakeCtx {
    pub reason: WakeReason,
    /// CPU the placement decision runs on. For sync wakeups this is the
    /// waker's CPU.
    pub this_cpu: usize,
    /// Accepted for interface compatibility, never consulted.
    pub sibling_count_hint: u32,
}

impl WakeCtx {
    pub fn new(reason: WakeReason, this_cpu: usize) -> Self {
        Self {
            reason,
            this_cpu,
            sibling_count_hint: 0,
        }
    }

    pub fn wakeup(this_cpu: usize) -> Self {
        Self::new(WakeReason::Wakeup, this_cpu)
    }

    pub fn sync(this_cpu: usize) -> Self {
        Self::new(WakeReason::Sync, this_cpu)
    }

    pub fn fork(this_cpu: usize) -> Self {
        Self::new(WakeReason::Fork, this_cpu)
    }

    pub fn exec(this_cpu: usize) -> Self {
        Self::new(WakeReason::Exec, this_cpu)
    }

    pub fn is_sync(&self) -> bool {
        self.reason == WakeReason::Sync
    }
}

/// Read-only view of the task being placed. The owner (the scheduler core or
/// a test harness) fills it in from its own bookkeeping before each call.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    pub pid: i32,
    pub class: TaskClass,
    pub cpus_allowed: Cpumask,
    /// Priority adjustment score, e.g. Android's oom_score_adj.
    pub oom_score_adj: i32,
    /// CPU the task is currently assigned to.
    pub cpu: usize,
    /// Queued on a runqueue, or currently running.
    pub queued: bool,
    /// Decayed utilization average.
    pub util_avg: u64,
    /// Estimated utilization at last dequeue. Zero when not tracked.
    pub util_est: u64,
    /// Hierarchical load average.
    pub load_avg: u64,
}

impl Task {
    pub fn new(pid: i32, cpus_allowed: Cpumask) -> Self {
        Self {
            pid,
            class: TaskClass::Fair,
            cpu: cpus_allowed.first().unwrap_or(0),
            cpus_allowed,
            oom_score_adj: 0,
            queued: false,
            util_avg: 0,
            util_est: 0,
            load_avg: 0,
        }
    }

    /// Utilization of the task with the estimated value taken into account
    /// when @util_est is enabled.
    pub fn util(&self, util_est: bool) -> u64 {
        if util_est {
            self.util_avg.max(self.util_est)
        } else {
            self.util_avg
        }
    }
}
