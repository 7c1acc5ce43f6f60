// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Scenarios
//!
//! A scenario is a JSON file describing a frozen system (per-CPU figures and
//! CPU masks) and a list of placement requests to run against it:
//!
//!```json
//! {
//!   "config": { "policy": "capacity" },
//!   "cpus": [
//!     { "capacity": 1024, "util_avg": 300, "nr_running": 1 },
//!     { "capacity": 512, "util_avg": 100, "nr_running": 1 }
//!   ],
//!   "active": "0-1",
//!   "placements": [
//!     { "task": { "pid": 7, "util_avg": 200 }, "prev_cpu": 1, "expect": 0 }
//!   ]
//! }
//!```
//!
//! Masks are kernel cpulists. Omitted masks default to every CPU (active,
//! allowed) or to the capacity-derived tiers (perf, lp). An `expect` CPU
//! turns a request into a check.

use std::fs;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use log::warn;
use serde::Deserialize;

use crate::cass::Cass;
use crate::cass::Decision;
use crate::config::CassConfig;
use crate::snapshot::CpuState;
use crate::snapshot::SystemSnapshot;
use crate::stats::PlacementMetrics;
use crate::stats::PlacementStats;
use crate::task::Task;
use crate::task::TaskClass;
use crate::task::WakeCtx;
use crate::task::WakeReason;
use crate::Cpumask;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskSpec {
    pid: i32,
    #[serde(default)]
    class: TaskClass,
    cpus_allowed: Option<String>,
    #[serde(default)]
    oom_score_adj: i32,
    cpu: Option<usize>,
    #[serde(default)]
    queued: bool,
    #[serde(default)]
    util_avg: u64,
    #[serde(default)]
    util_est: u64,
    #[serde(default)]
    load_avg: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlacementSpec {
    task: TaskSpec,
    prev_cpu: Option<usize>,
    #[serde(default)]
    reason: WakeReason,
    this_cpu: Option<usize>,
    #[serde(default)]
    sibling_count_hint: u32,
    expect: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioSpec {
    #[serde(default)]
    config: CassConfig,
    cpus: Vec<CpuState>,
    active: Option<String>,
    perf: Option<String>,
    lp: Option<String>,
    #[serde(default)]
    placements: Vec<PlacementSpec>,
}

/// One placement to run against the snapshot.
#[derive(Clone, Debug)]
pub struct Request {
    pub task: Task,
    pub prev_cpu: usize,
    pub wake: WakeCtx,
    pub expect: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub pid: i32,
    pub decision: Decision,
    pub expect: Option<usize>,
}

impl Outcome {
    /// False only if an expected CPU was given and not chosen.
    pub fn matched(&self) -> bool {
        self.expect.map_or(true, |cpu| cpu == self.decision.cpu)
    }
}

#[derive(Clone, Debug)]
pub struct Scenario {
    pub config: CassConfig,
    pub snapshot: SystemSnapshot,
    pub requests: Vec<Request>,
}

fn check_cpu(what: &str, cpu: usize, nr_cpus: usize) -> Result<usize> {
    if cpu >= nr_cpus {
        bail!("{} {} is beyond the {} CPUs in the scenario", what, cpu, nr_cpus);
    }
    Ok(cpu)
}

impl Scenario {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Scenario> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario = Self::from_json(&json)
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        info!(
            "Loaded {}: {} CPUs, {} placements",
            path.display(),
            scenario.snapshot.nr_cpus(),
            scenario.requests.len()
        );
        Ok(scenario)
    }

    pub fn from_json(json: &str) -> Result<Scenario> {
        let spec: ScenarioSpec = serde_json::from_str(json).context("Failed to parse JSON")?;
        Self::from_spec(spec)
    }

    fn from_spec(spec: ScenarioSpec) -> Result<Scenario> {
        spec.config.validate()?;

        let mut builder = SystemSnapshot::builder().cpus(spec.cpus);
        if let Some(list) = &spec.active {
            builder = builder.active(Cpumask::from_cpulist(list).context("Bad active mask")?);
        }
        if let Some(list) = &spec.perf {
            builder = builder.perf(Cpumask::from_cpulist(list).context("Bad perf mask")?);
        }
        if let Some(list) = &spec.lp {
            builder = builder.lp(Cpumask::from_cpulist(list).context("Bad lp mask")?);
        }
        let snapshot = builder.build()?;
        let nr_cpus = snapshot.nr_cpus();
        let span = snapshot.span();

        let mut requests = Vec::with_capacity(spec.placements.len());
        for (idx, pl) in spec.placements.into_iter().enumerate() {
            let req = Self::build_request(pl, nr_cpus, &span)
                .with_context(|| format!("Bad placement #{}", idx))?;
            requests.push(req);
        }

        Ok(Scenario {
            config: spec.config,
            snapshot,
            requests,
        })
    }

    fn build_request(pl: PlacementSpec, nr_cpus: usize, span: &Cpumask) -> Result<Request> {
        let ts = pl.task;
        let cpus_allowed = match &ts.cpus_allowed {
            Some(list) => Cpumask::from_cpulist(list).context("Bad cpus_allowed")?,
            None => *span,
        };
        if cpus_allowed.is_empty() {
            bail!("Task {} has no allowed CPU", ts.pid);
        }
        if !cpus_allowed.is_subset(span) {
            bail!(
                "Task {} allows CPUs {} beyond the {} in the scenario",
                ts.pid,
                cpus_allowed.to_cpulist(),
                nr_cpus
            );
        }

        let mut task = Task::new(ts.pid, cpus_allowed);
        task.class = ts.class;
        task.oom_score_adj = ts.oom_score_adj;
        task.queued = ts.queued;
        task.util_avg = ts.util_avg;
        task.util_est = ts.util_est;
        task.load_avg = ts.load_avg;
        if let Some(cpu) = ts.cpu {
            task.cpu = check_cpu("task cpu", cpu, nr_cpus)?;
        }

        let prev_cpu = check_cpu("prev_cpu", pl.prev_cpu.unwrap_or(task.cpu), nr_cpus)?;
        if ts.cpu.is_none() {
            task.cpu = prev_cpu;
        }
        let this_cpu = check_cpu("this_cpu", pl.this_cpu.unwrap_or(prev_cpu), nr_cpus)?;

        let mut wake = WakeCtx::new(pl.reason, this_cpu);
        wake.sibling_count_hint = pl.sibling_count_hint;

        Ok(Request {
            task,
            prev_cpu,
            wake,
            expect: pl.expect,
        })
    }

    /// Run every request through the selector with @config.
    pub fn replay(
        &self,
        config: &CassConfig,
        stats: &mut PlacementStats,
        metrics: Option<&PlacementMetrics>,
    ) -> Vec<Outcome> {
        let cass = Cass::new(&self.snapshot, *config);
        let mut outcomes = Vec::with_capacity(self.requests.len());

        for req in self.requests.iter() {
            let decision = cass.place(&req.task, req.prev_cpu, &req.wake);
            let outcome = Outcome {
                pid: req.task.pid,
                decision,
                expect: req.expect,
            };

            debug!(
                "pid={} reason={:?} prev={} -> cpu={} ({})",
                req.task.pid, req.wake.reason, req.prev_cpu, decision.cpu, decision.how
            );

            stats.record(&decision, metrics);
            if !outcome.matched() {
                warn!(
                    "pid={} placed on CPU {} ({}), expected CPU {}",
                    req.task.pid,
                    decision.cpu,
                    decision.how,
                    req.expect.unwrap_or_default()
                );
                stats.record_mismatch(metrics);
            }
            outcomes.push(outcome);
        }

        outcomes
    }
}
