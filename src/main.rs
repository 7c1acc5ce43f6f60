// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::warn;
use metrics_exporter_prometheus::PrometheusBuilder;
use scx_cass::stats::PlacementMetrics;
use scx_cass::topology::SYSFS_CPU_ROOT;
use scx_cass::AdjRange;
use scx_cass::CassConfig;
use scx_cass::PlacementStats;
use scx_cass::Policy;
use scx_cass::Scenario;
use scx_cass::Topology;

/// scx_cass: Capacity Aware Superset Scheduler CPU selection
///
/// CASS picks the CPU a waking task should run on by comparing the relative
/// utilization (utilization over available capacity) of every eligible CPU,
/// so big and little CPUs are loaded fairly. Ties are broken in favor of the
/// waker's CPU on sync wakeups and then the task's previous CPU.
///
/// This tool replays scenario files (a frozen view of per-CPU load plus a
/// list of placement requests) through the selector and reports where each
/// task lands. With --interval the scenario is re-read and replayed
/// periodically, so an external producer can keep it up to date.
#[derive(Debug, Parser)]
struct Opts {
    /// Scenario JSON file to replay.
    #[clap(short = 's', long, required_unless_present = "show_topology")]
    scenario: Option<PathBuf>,

    /// Replay interval in seconds. 0 replays once and exits.
    #[clap(short = 'i', long, default_value = "0")]
    interval: f64,

    /// Selection policy revision. Overrides the scenario's config.
    #[clap(short = 'p', long, value_enum)]
    policy: Option<Policy>,

    /// Lowest priority adjustment score treated as performance class.
    #[clap(long, allow_hyphen_values = true)]
    perf_adj_min: Option<i32>,

    /// Highest priority adjustment score treated as performance class.
    #[clap(long, allow_hyphen_values = true)]
    perf_adj_max: Option<i32>,

    /// Ignore estimated utilization and only use decayed averages.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    no_util_est: bool,

    /// Print the CPU tiers detected from sysfs and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    show_topology: bool,

    /// sysfs CPU directory used by --show-topology.
    #[clap(long, default_value = SYSFS_CPU_ROOT)]
    sysfs_root: PathBuf,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable the Prometheus endpoint for metrics on port 9000.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    enable_prometheus: bool,
}

impl Opts {
    fn config(&self, base: &CassConfig) -> Result<CassConfig> {
        let mut cfg = *base;
        if let Some(policy) = self.policy {
            cfg.policy = policy;
        }
        cfg.perf_adj = AdjRange {
            min: self.perf_adj_min.unwrap_or(cfg.perf_adj.min),
            max: self.perf_adj_max.unwrap_or(cfg.perf_adj.max),
        };
        if self.no_util_est {
            cfg.util_est = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn show_topology(opts: &Opts) -> Result<()> {
    let top = Topology::from_sysfs(&opts.sysfs_root)?;
    println!("cpus={} online={}", top.nr_cpus(), top.online().to_cpulist());
    for cpu in 0..top.nr_cpus() {
        println!("  CPU[{:03}] cap={}", cpu, top.capacity(cpu).unwrap_or(0));
    }
    println!("perf={} lp={}", top.perf_mask().to_cpulist(), top.lp_mask().to_cpulist());
    if !top.is_asymmetric() {
        info!("CPU capacities are symmetric, tiers are not narrowing placement");
    }
    Ok(())
}

/// None replays once.
fn replay_interval(secs: f64) -> Result<Option<Duration>> {
    if secs == 0.0 {
        return Ok(None);
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(interval) if !interval.is_zero() => Ok(Some(interval)),
        Ok(_) => bail!("Interval {} rounds down to zero", secs),
        Err(e) => bail!("Invalid interval {}: {}", secs, e),
    }
}

/// Next replay deadline after @now. Missed deadlines are skipped.
fn next_replay_at(prev: Instant, now: Instant, interval: Duration) -> Result<Instant> {
    let next_at = match prev.checked_add(interval) {
        Some(at) if at >= now => at,
        _ => now.checked_add(interval).context("Interval too long")?,
    };
    Ok(next_at)
}

struct Replayer {
    path: PathBuf,
    metrics: PlacementMetrics,
    stats: PlacementStats,
}

impl Replayer {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            metrics: PlacementMetrics::new(),
            stats: PlacementStats::default(),
        }
    }

    fn step(&mut self, opts: &Opts) -> Result<()> {
        let started_at = Instant::now();
        let scenario = Scenario::load(&self.path)?;
        let cfg = opts.config(&scenario.config)?;

        let outcomes = scenario.replay(&cfg, &mut self.stats, Some(&self.metrics));
        for out in outcomes.iter() {
            println!(
                "pid={:<7} cpu={:<3} via={}{}",
                out.pid,
                out.decision.cpu,
                out.decision.how,
                match out.expect {
                    Some(cpu) if cpu != out.decision.cpu => format!(" (expected {})", cpu),
                    _ => String::new(),
                }
            );
        }
        info!(
            "Replayed {} placements in {}us",
            outcomes.len(),
            started_at.elapsed().as_micros()
        );
        Ok(())
    }

    fn report(&self) -> Result<()> {
        let mut out = std::io::stdout().lock();
        self.stats.format(&mut out)
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    if opts.show_topology {
        return show_topology(&opts);
    }

    let interval = replay_interval(opts.interval)?;

    if opts.enable_prometheus {
        info!("Enabling Prometheus endpoint: http://localhost:9000");
        PrometheusBuilder::new()
            .install()
            .context("Failed to install Prometheus recorder")?;
    }

    let path = match &opts.scenario {
        Some(path) => path.clone(),
        None => bail!("No scenario given"),
    };
    let mut replayer = Replayer::new(path);

    if let Some(interval) = interval {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .context("Error setting Ctrl-C handler")?;

        let mut next_at = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next_at {
                // The producer may be midway through rewriting the file.
                if let Err(e) = replayer.step(&opts) {
                    warn!("Replay failed: {:#}", e);
                }
                next_at = next_replay_at(next_at, now, interval)?;
            }
            std::thread::sleep(
                next_at
                    .saturating_duration_since(Instant::now())
                    .min(Duration::from_millis(100)),
            );
        }
    } else {
        replayer.step(&opts)?;
    }

    replayer.report()?;
    if replayer.stats.mismatches > 0 {
        bail!(
            "{} of {} placements differ from their expected CPU",
            replayer.stats.mismatches,
            replayer.stats.total
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!(replay_interval(0.0).unwrap(), None);
        assert_eq!(
            replay_interval(1.5).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(replay_interval(-1.0).is_err());
        assert!(replay_interval(f64::NAN).is_err());
        assert!(replay_interval(f64::INFINITY).is_err());
        assert!(replay_interval(1e30).is_err());
        assert!(replay_interval(1e-12).is_err());
    }

    #[test]
    fn next_replay_deadline() {
        let start = Instant::now();
        let sec = Duration::from_secs(1);
        assert_eq!(next_replay_at(start, start, sec).unwrap(), start + sec);

        // Fell behind by more than one interval.
        let late = start + Duration::from_secs(5);
        assert_eq!(next_replay_at(start, late, sec).unwrap(), late + sec);

        assert!(next_replay_at(start, start, Duration::MAX).is_err());
    }
}
