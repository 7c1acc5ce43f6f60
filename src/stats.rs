// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use metrics::counter;
use metrics::Counter;

use crate::cass::Decision;
use crate::cass::Placement;

/// Counters exported through the installed metrics recorder.
pub struct PlacementMetrics {
    exec: Counter,
    no_active: Counter,
    idle: Counter,
    sync_local: Counter,
    best: Counter,
    empty: Counter,
    mismatches: Counter,
}

impl Default for PlacementMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementMetrics {
    pub fn new() -> Self {
        Self {
            exec: counter!("placements_total", "type" => "exec"),
            no_active: counter!("placements_total", "type" => "no_active"),
            idle: counter!("placements_total", "type" => "idle"),
            sync_local: counter!("placements_total", "type" => "sync_local"),
            best: counter!("placements_total", "type" => "best"),
            empty: counter!("placements_total", "type" => "empty"),
            mismatches: counter!("placement_mismatches_total"),
        }
    }

    fn counter(&self, how: Placement) -> &Counter {
        match how {
            Placement::Exec => &self.exec,
            Placement::NoActive => &self.no_active,
            Placement::Idle => &self.idle,
            Placement::SyncLocal => &self.sync_local,
            Placement::Best => &self.best,
            Placement::Empty => &self.empty,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlacementStats {
    pub total: u64,
    pub mismatches: u64,
    pub by_how: BTreeMap<Placement, u64>,
    pub by_cpu: BTreeMap<usize, u64>,
}

impl PlacementStats {
    pub fn record(&mut self, decision: &Decision, metrics: Option<&PlacementMetrics>) {
        self.total += 1;
        *self.by_how.entry(decision.how).or_default() += 1;
        *self.by_cpu.entry(decision.cpu).or_default() += 1;
        if let Some(m) = metrics {
            m.counter(decision.how).increment(1);
        }
    }

    pub fn record_mismatch(&mut self, metrics: Option<&PlacementMetrics>) {
        self.mismatches += 1;
        if let Some(m) = metrics {
            m.mismatches.increment(1);
        }
    }

    pub fn count(&self, how: Placement) -> u64 {
        self.by_how.get(&how).copied().unwrap_or(0)
    }

    fn pct(&self, n: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * n as f64 / self.total as f64
        }
    }

    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "tot={:7} mismatch={}", self.total, self.mismatches)?;
        for how in Placement::ALL {
            let n = self.count(how);
            if n > 0 {
                writeln!(w, "  {:<10} {:7} {:6.2}%", how.name(), n, self.pct(n))?;
            }
        }
        for (cpu, n) in self.by_cpu.iter() {
            writeln!(w, "  CPU[{:03}] {:7} {:6.2}%", cpu, n, self.pct(*n))?;
        }
        Ok(())
    }
}
