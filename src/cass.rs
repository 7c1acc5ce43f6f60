// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Capacity Aware Superset Scheduler
//!
//! CASS picks the CPU a task should run on next. It compares CPUs by their
//! relative utilization, i.e. utilization scaled by the capacity the CPU has
//! left once real-time, deadline and interrupt time are taken out. Using the
//! relative figure lets big and little CPUs be compared directly, and load is
//! not clipped once a CPU is over-utilized, so it keeps spreading fairly even
//! when the whole system is saturated.
//!
//! When two CPUs end up with the same relative utilization, a short
//! hierarchy of tie-breaks decides:
//!
//! 1. Lower relative utilization.
//! 2. For sync wakeups, the waker's CPU.
//! 3. The task's previous CPU.
//! 4. Otherwise the CPU found first is kept.
//!
//! There is no explicit energy model. Balancing relative utilization keeps
//! every CPU at the lowest performance state that covers its share of the
//! load, which is what an energy model would be aiming for anyway.
//!
//! Placement is called with runqueue locks held, so [`Cass::place`] never
//! allocates, never blocks and visits each eligible CPU at most once. The
//! candidate being evaluated and the best one so far live in a two-slot
//! array on the stack.

use std::cmp::Ordering;
use std::fmt;

use crate::config::CassConfig;
use crate::config::Policy;
use crate::signals::CpuSignals;
use crate::task::Task;
use crate::task::WakeCtx;
use crate::task::WakeReason;
use crate::Cpumask;
use crate::SCHED_CAPACITY_SCALE;

/// How a placement decision was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placement {
    /// Exec placement keeps the task where it is.
    Exec,
    /// None of the allowed CPUs is active.
    NoActive,
    /// An idle CPU was found.
    Idle,
    /// Sync wakeup onto the waker's CPU, which only runs the waker.
    SyncLocal,
    /// Winner of the relative utilization comparison.
    Best,
    /// Nothing was visited.
    Empty,
}

impl Placement {
    pub const ALL: [Placement; 6] = [
        Placement::Exec,
        Placement::NoActive,
        Placement::Idle,
        Placement::SyncLocal,
        Placement::Best,
        Placement::Empty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Placement::Exec => "exec",
            Placement::NoActive => "no_active",
            Placement::Idle => "idle",
            Placement::SyncLocal => "sync_local",
            Placement::Best => "best",
            Placement::Empty => "empty",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub cpu: usize,
    pub how: Placement,
}

impl Decision {
    fn new(cpu: usize, how: Placement) -> Self {
        Self { cpu, how }
    }
}

/// One CPU under evaluation. @util holds the relative utilization once the
/// candidate is fully computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuCand {
    pub cpu: usize,
    pub cap: u64,
    pub util: u64,
}

/// Capacity of @cpu left for fair tasks. Never less than 1 so it can be
/// divided by.
pub fn cpu_capacity<S: CpuSignals + ?Sized>(sig: &S, cpu: usize) -> u64 {
    sig.capacity_orig(cpu)
        .saturating_sub(sig.stolen_util(cpu))
        .max(1)
}

/// @util scaled to a CPU of capacity @cap.
pub fn relative_util(util: u64, cap: u64) -> u64 {
    util.saturating_mul(SCHED_CAPACITY_SCALE) / cap.max(1)
}

/// Compare two fully computed candidates. `Ordering::Greater` means @a is
/// the better CPU; `Ordering::Equal` means neither is preferred. Each rule
/// only applies on an exact tie of all the rules before it.
pub fn cass_cmp(a: &CpuCand, b: &CpuCand, prev_cpu: usize, sync_cpu: Option<usize>) -> Ordering {
    b.util
        .cmp(&a.util)
        .then_with(|| match sync_cpu {
            Some(cpu) => (a.cpu == cpu).cmp(&(b.cpu == cpu)),
            None => Ordering::Equal,
        })
        .then_with(|| (a.cpu == prev_cpu).cmp(&(b.cpu == prev_cpu)))
}

/// Where the figures for one placement come from.
struct Source {
    policy: Policy,
    /// The task's own contribution, added to CPUs it isn't queued on.
    p_util: u64,
    /// Waker's CPU for sync wakeups.
    sync_cpu: Option<usize>,
}

pub struct Cass<'a, S: CpuSignals + ?Sized> {
    sig: &'a S,
    cfg: CassConfig,
}

impl<'a, S: CpuSignals + ?Sized> Cass<'a, S> {
    pub fn new(sig: &'a S, cfg: CassConfig) -> Self {
        Self { sig, cfg }
    }

    pub fn config(&self) -> &CassConfig {
        &self.cfg
    }

    /// Pick the CPU @p should run on.
    pub fn select_cpu(&self, p: &Task, prev_cpu: usize, wake: &WakeCtx) -> usize {
        self.place(p, prev_cpu, wake).cpu
    }

    /// Same as select_cpu() but also reports which path produced the CPU.
    pub fn place(&self, p: &Task, prev_cpu: usize, wake: &WakeCtx) -> Decision {
        // The task's footprint is about to change, anything measured now is
        // stale.
        if wake.reason == WakeReason::Exec {
            let cpu = if p.cpus_allowed.test_cpu(prev_cpu) {
                prev_cpu
            } else {
                self.first_allowed(p, prev_cpu)
            };
            return Decision::new(cpu, Placement::Exec);
        }

        if p.class.is_rt() {
            self.select_task_rq_rt(p, prev_cpu)
        } else {
            self.select_task_rq_fair(p, prev_cpu, wake)
        }
    }

    /// Placement for fair tasks, which have load tracking and can be woken
    /// synchronously.
    pub fn select_task_rq_fair(&self, p: &Task, prev_cpu: usize, wake: &WakeCtx) -> Decision {
        let cpus = match self.eligible_cpus(p) {
            Some(cpus) => cpus,
            None => return Decision::new(self.first_allowed(p, prev_cpu), Placement::NoActive),
        };

        let src = match self.cfg.policy {
            Policy::Capacity => Source {
                policy: Policy::Capacity,
                p_util: p.util(self.cfg.util_est),
                sync_cpu: wake.is_sync().then_some(wake.this_cpu),
            },
            Policy::Load => Source {
                policy: Policy::Load,
                // A new child's load hasn't been synced to anything yet.
                p_util: match wake.reason {
                    WakeReason::Fork => 0,
                    _ => p.load_avg,
                },
                sync_cpu: None,
            },
        };

        self.best_cpu(p, prev_cpu, &cpus, &src)
    }

    /// Placement for real-time and deadline tasks. They have no per-entity
    /// load average and are never sync woken.
    pub fn select_task_rq_rt(&self, p: &Task, prev_cpu: usize) -> Decision {
        let cpus = match self.eligible_cpus(p) {
            Some(cpus) => cpus,
            None => return Decision::new(self.first_allowed(p, prev_cpu), Placement::NoActive),
        };

        let src = Source {
            policy: Policy::Capacity,
            p_util: p.util_est,
            sync_cpu: None,
        };

        self.best_cpu(p, prev_cpu, &cpus, &src)
    }

    /// True if @p belongs on the performance CPUs.
    pub fn is_perf_task(&self, p: &Task) -> bool {
        self.cfg.perf_adj.contains(p.oom_score_adj)
    }

    /// Active CPUs @p may run on, narrowed to its performance tier when the
    /// tier has any of them. None if no allowed CPU is active.
    pub fn eligible_cpus(&self, p: &Task) -> Option<Cpumask> {
        let cpus = self.sig.active_mask().and(&p.cpus_allowed);
        if cpus.is_empty() {
            return None;
        }

        let tier = if self.is_perf_task(p) {
            self.sig.perf_mask()
        } else {
            self.sig.lp_mask()
        };

        let narrowed = cpus.and(tier);
        if narrowed.is_empty() {
            Some(cpus)
        } else {
            Some(narrowed)
        }
    }

    // Some tasks are allowed to run on inactive CPUs, so any allowed CPU
    // beats none.
    fn first_allowed(&self, p: &Task, prev_cpu: usize) -> usize {
        debug_assert!(!p.cpus_allowed.is_empty(), "task {} has no allowed CPU", p.pid);
        p.cpus_allowed.first().unwrap_or(prev_cpu)
    }

    /// Utilization of @cpu's fair runqueue.
    fn cpu_util(&self, cpu: usize, src: &Source) -> u64 {
        match src.policy {
            Policy::Load => self.sig.load_avg(cpu),
            Policy::Capacity => {
                let util = self.sig.util_avg(cpu);
                let est = self.sig.util_est(cpu);

                // Enqueued tasks that ran recently keep the CPU from looking
                // idle. The estimate isn't running work, so nothing is
                // deducted from it.
                if self.cfg.util_est && est > util {
                    return est;
                }

                // The waker is about to sleep. An RT curr has no fair
                // utilization to give back.
                if src.sync_cpu == Some(cpu) && !self.sig.curr_is_rt(cpu) {
                    return util.saturating_sub(self.sig.curr_util(cpu));
                }

                util
            }
        }
    }

    fn fill_cand(&self, curr: &mut CpuCand, cpu: usize, p: &Task, src: &Source) {
        curr.cpu = cpu;
        curr.cap = cpu_capacity(self.sig, cpu);

        let mut util = self.cpu_util(cpu, src);

        // Look at what this CPU would be like with @p on it. A queued task is
        // already accounted for on its own CPU.
        if !(p.queued && cpu == p.cpu) {
            util = util.saturating_add(src.p_util);
        }

        curr.util = relative_util(util, curr.cap);
    }

    fn shortcut(&self, cpu: usize, src: &Source) -> Option<Placement> {
        if src.policy != Policy::Capacity {
            return None;
        }

        if self.sig.is_idle(cpu) && !self.sig.is_isolated(cpu) {
            return Some(Placement::Idle);
        }

        // Only the waker runs here and it is about to stop.
        if src.sync_cpu == Some(cpu) && self.sig.nr_running(cpu) == 1 {
            return Some(Placement::SyncLocal);
        }

        None
    }

    fn best_cpu(&self, p: &Task, prev_cpu: usize, cpus: &Cpumask, src: &Source) -> Decision {
        let mut cands = [CpuCand::default(); 2];
        let mut best: Option<usize> = None;
        let mut cidx = 0;

        for cpu in cpus.iter() {
            if let Some(how) = self.shortcut(cpu, src) {
                return Decision::new(cpu, how);
            }

            // Use the free slot for the challenger.
            self.fill_cand(&mut cands[cidx], cpu, p, src);

            let better = match best {
                None => true,
                Some(bidx) => {
                    let (curr, champ) = (&cands[cidx], &cands[bidx]);
                    match src.policy {
                        Policy::Capacity => {
                            cass_cmp(curr, champ, prev_cpu, src.sync_cpu) == Ordering::Greater
                        }
                        Policy::Load => curr.util <= champ.util,
                    }
                }
            };

            if better {
                best = Some(cidx);
                cidx ^= 1;
            }
        }

        match best {
            Some(bidx) => Decision::new(cands[bidx].cpu, Placement::Best),
            None => Decision::new(prev_cpu, Placement::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(cpu: usize, util: u64) -> CpuCand {
        CpuCand { cpu, cap: 1024, util }
    }

    #[test]
    fn lower_util_wins() {
        let a = cand(0, 100);
        let b = cand(1, 200);
        assert_eq!(cass_cmp(&a, &b, 1, Some(1)), Ordering::Greater);
        assert_eq!(cass_cmp(&b, &a, 1, Some(1)), Ordering::Less);
    }

    #[test]
    fn sync_cpu_breaks_util_tie() {
        let a = cand(0, 100);
        let b = cand(1, 100);
        assert_eq!(cass_cmp(&a, &b, 1, Some(0)), Ordering::Greater);
        assert_eq!(cass_cmp(&b, &a, 1, Some(0)), Ordering::Less);
    }

    #[test]
    fn prev_cpu_breaks_remaining_tie() {
        let a = cand(0, 100);
        let b = cand(1, 100);
        assert_eq!(cass_cmp(&a, &b, 1, None), Ordering::Less);
        assert_eq!(cass_cmp(&b, &a, 1, None), Ordering::Greater);
        // Neither is special.
        assert_eq!(cass_cmp(&a, &b, 5, Some(7)), Ordering::Equal);
    }

    #[test]
    fn close_util_is_not_a_tie() {
        let a = cand(0, 101);
        let b = cand(1, 100);
        assert_eq!(cass_cmp(&a, &b, 0, Some(0)), Ordering::Less);
    }

    #[test]
    fn relative_util_scales_by_capacity() {
        assert_eq!(relative_util(500, 1024), 500);
        assert_eq!(relative_util(300, 512), 600);
        assert_eq!(relative_util(300, 0), 300 * SCHED_CAPACITY_SCALE);
        assert_eq!(relative_util(u64::MAX, 1), u64::MAX);
    }
}
