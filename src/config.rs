// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use anyhow::bail;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

/// Which revision of the selection policy to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Relative utilization with idle fast paths and the sync / previous CPU
    /// tie-breaks.
    #[default]
    Capacity,
    /// Relative load average only. Exact ties go to the CPU visited last.
    Load,
}

/// Inclusive range of priority adjustment scores that marks a task as
/// performance class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjRange {
    pub min: i32,
    pub max: i32,
}

impl Default for AdjRange {
    /// FOREGROUND_APP_ADJ (0) through PERCEPTIBLE_APP_ADJ (200) plus the
    /// slack Android leaves below the next bucket.
    fn default() -> Self {
        Self { min: 0, max: 224 }
    }
}

impl AdjRange {
    pub fn contains(&self, adj: i32) -> bool {
        self.min <= adj && adj <= self.max
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CassConfig {
    pub perf_adj: AdjRange,
    pub policy: Policy,
    /// Let estimated utilization override the decayed average, for both the
    /// CPU and the task being placed.
    pub util_est: bool,
}

impl Default for CassConfig {
    fn default() -> Self {
        Self {
            perf_adj: AdjRange::default(),
            policy: Policy::default(),
            util_est: true,
        }
    }
}

impl CassConfig {
    pub fn validate(&self) -> Result<()> {
        if self.perf_adj.min > self.perf_adj.max {
            bail!(
                "perf_adj range is empty: min ({}) > max ({})",
                self.perf_adj.min,
                self.perf_adj.max
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_adj_range() {
        let range = AdjRange::default();
        assert!(!range.contains(-1));
        assert!(range.contains(0));
        assert!(range.contains(200));
        assert!(range.contains(224));
        assert!(!range.contains(225));
        assert!(!range.contains(900));
    }

    #[test]
    fn validate_rejects_empty_range() {
        let mut cfg = CassConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.perf_adj = AdjRange { min: 10, max: 9 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json() {
        let cfg: CassConfig = serde_json::from_str(r#"{"policy": "load"}"#).unwrap();
        assert_eq!(cfg.policy, Policy::Load);
        assert_eq!(cfg.perf_adj, AdjRange::default());
        assert!(cfg.util_est);
    }
}
