//! Reconfiguration Sweep CLI
//!
//! Drain a production or test sweep of reconfiguration simulations.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use reconf_env::{Mode, TrialStatus};
use reconf_sweep::{Driver, SweepConfig, SweepReport};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Full paper sweep over pre-generated uptime schedules
    Production,
    /// One trial per topology, verified against golden fixtures
    Test,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Production => Mode::Production,
            ModeArg::Test => Mode::Test,
        }
    }
}

/// Parallel sweep driver for reconfiguration simulations
#[derive(Parser, Debug)]
#[command(name = "reconf-sweep")]
#[command(about = "Run reconfiguration simulation sweeps in parallel", long_about = None)]
struct Args {
    /// Sweep to run
    #[arg(short, long, value_enum, default_value = "test")]
    mode: ModeArg,

    /// Permanent results root (default: ~/results-reconfiguration/topologies/<paper|tests>)
    #[arg(long)]
    results_root: Option<PathBuf>,

    /// Scratch directory for ephemeral debug logs
    #[arg(long)]
    scratch_root: Option<PathBuf>,

    /// Work queue directory; reuse it to resume an interrupted sweep
    #[arg(long)]
    queue_dir: Option<PathBuf>,

    /// Test fixtures and their uptime schedules
    #[arg(long)]
    fixtures_dir: Option<PathBuf>,

    /// Production uptime schedules
    #[arg(long)]
    schedules_dir: Option<PathBuf>,

    /// Number of workers (default: half the available cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Base link bandwidth in bytes per second
    #[arg(long, default_value_t = reconf_sweep::config::DEFAULT_BANDWIDTH)]
    bandwidth: f64,

    /// Model radio interference in the simulation engine
    #[arg(long)]
    interferences: bool,

    /// Return items left in progress by a dead run to the pool first
    #[arg(long)]
    reset_in_progress: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> SweepConfig {
        let mut config = SweepConfig::for_mode(self.mode.into());
        if let Some(dir) = self.results_root {
            config = config.with_results_root(dir);
        }
        if let Some(dir) = self.scratch_root {
            config = config.with_scratch_root(dir);
        }
        if let Some(dir) = self.queue_dir {
            config = config.with_queue_dir(dir);
        }
        if let Some(dir) = self.fixtures_dir {
            config = config.with_fixtures_dir(dir);
        }
        if let Some(dir) = self.schedules_dir {
            config = config.with_schedules_dir(dir);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.bandwidth = self.bandwidth;
        config.interferences = self.interferences;
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --json output stays parseable
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let json = args.json;
    let reset = args.reset_in_progress;
    let config = args.into_config();
    let mode = config.mode;

    if !json {
        info!("Reconfiguration sweep v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("Results: {}", config.results_root.display());
        info!("Queue:   {}", config.queue_dir.display());
    }

    let report = Driver::new(config)
        .with_reset_in_progress(reset)
        .run()
        .context("sweep aborted")?;

    if json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }

    let failed = match mode {
        Mode::Test => !report.is_clean(),
        Mode::Production => report.unrecorded > 0 || !report.worker_errors.is_empty(),
    };
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_json(report: &SweepReport) -> anyhow::Result<()> {
    let summary = serde_json::json!({
        "workers": report.workers,
        "elapsed_secs": report.elapsed_secs,
        "executed": report.outcomes.len(),
        "done": report.done,
        "skipped": report.skipped,
        "failed_verifications": report.failed_verifications,
        "unrecorded": report.unrecorded,
        "queue": report.stats,
        "worker_errors": report.worker_errors,
        "results": report.outcomes.iter().map(|o| {
            serde_json::json!({
                "params": o.params,
                "status": o.status,
                "passed": o.passed(),
                "elapsed_secs": o.elapsed.as_secs_f64(),
                "mismatches": o.mismatches,
                "fault": o.fault,
            })
        }).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_summary(report: &SweepReport) {
    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "{} trials in {:.1}s on {} workers: {} done, {} skipped",
        report.outcomes.len(),
        report.elapsed_secs,
        report.workers,
        report.done,
        report.skipped
    );
    info!(
        "Queue: {} total, {} remaining, {} in progress",
        report.stats.total, report.stats.remaining, report.stats.in_progress
    );

    if report.is_clean() {
        info!("✅ All {} trials passed!", report.outcomes.len());
        return;
    }

    for outcome in &report.outcomes {
        match (outcome.status, &outcome.fault) {
            (TrialStatus::Skip, fault) => warn!(
                "  - {} skipped: {}",
                outcome.params,
                fault.as_deref().unwrap_or("unknown")
            ),
            (TrialStatus::Done, Some(fault)) => error!("  - {} {}", outcome.params, fault),
            (TrialStatus::Done, None) if !outcome.passed() => error!(
                "  - {} failed verification ({} mismatches)",
                outcome.params,
                outcome.mismatches.as_ref().map_or(0, Vec::len)
            ),
            _ => {}
        }
    }
    for e in &report.worker_errors {
        error!("  - {}", e);
    }
    error!(
        "❌ {} skipped, {} failed verification, {} not recorded",
        report.skipped, report.failed_verifications, report.unrecorded
    );
}
