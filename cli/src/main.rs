//! `gx2f` CLI: simulate scenarios, fit them, replay recorded events.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use detector::{NavigationMode, StraightLinePropagator, TelescopeGeometry};
use fitter_core::gating::MeasurementChi2OutlierFinder;
use fitter_core::metrics::FitMetrics;
use fitter_core::types::PARAMETER_NAMES;
use fitter_core::types::REDUCED_SIZE;
use fitter_core::{Extensions, Gx2Fitter, Gx2FitterOptions};
use sim::replay::{load_replay, save_replay, ReplayLog};
use sim::scenarios::{Scenario, ScenarioEvent, ScenarioKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gx2f", about = "Global chi-square track fitter CLI")]
struct Cli {
    /// Worker threads for batch fitting (default: one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Navigation {
    /// Visit every plane crossed within bounds
    Geometry,
    /// Visit only the planes carrying a measurement
    External,
}

impl From<Navigation> for NavigationMode {
    fn from(n: Navigation) -> Self {
        match n {
            Navigation::Geometry => NavigationMode::Geometry,
            Navigation::External => NavigationMode::External,
        }
    }
}

/// Fitter settings shared by all subcommands.
#[derive(clap::Args, Clone, Debug)]
struct FitArgs {
    /// Gauss-Newton iterations per track
    #[arg(long, default_value_t = 5)]
    iterations: usize,
    /// Stop iterating once the update norm falls below this value
    #[arg(long)]
    tolerance: Option<f64>,
    /// Reject measurements whose χ² exceeds this value
    #[arg(long)]
    outlier_chi2: Option<f64>,
    #[arg(long, value_enum, default_value_t = Navigation::Geometry)]
    navigation: Navigation,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, fit every track and output metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario's number of tracks
        #[arg(long)]
        tracks: Option<usize>,
        #[command(flatten)]
        fit: FitArgs,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the generated event
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Refit a previously recorded event.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        #[command(flatten)]
        fit: FitArgs,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            tracks,
            fit,
            output,
            save_replay: save_path,
        } => {
            run_scenario(scenario, seed, tracks, &fit, output.as_deref(), save_path.as_deref())?;
        }
        Commands::Replay { input, fit, output } => {
            run_replay(&input, &fit, output.as_deref())?;
        }
    }

    Ok(())
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    tracks: Option<usize>,
    fit: &FitArgs,
    output_path: Option<&Path>,
    replay_path: Option<&Path>,
) -> Result<()> {
    let mut scenario = Scenario::build(kind, seed);
    if let Some(n) = tracks {
        scenario = scenario.with_tracks(n);
    }

    println!(
        "Running scenario '{}' (seed={}, tracks={})...",
        scenario.name, seed, scenario.n_tracks
    );
    let event = scenario.generate()?;
    let report = fit_event(scenario.geometry()?, &event, fit)?;
    report.print();

    // Save replay if requested
    if let Some(rpath) = replay_path {
        save_replay(&ReplayLog::new(&scenario, event), rpath)?;
        println!("Replay saved to {}", rpath.display());
    }

    if let Some(opath) = output_path {
        report.write(&scenario.name, seed, opath)?;
        println!("Metrics saved to {}", opath.display());
    }

    Ok(())
}

fn run_replay(input: &Path, fit: &FitArgs, output_path: Option<&Path>) -> Result<()> {
    let log = load_replay(input)?;
    println!(
        "Replaying '{}' ({} tracks, {} measurements)...",
        log.scenario_name,
        log.event.tracks.len(),
        log.event.measurements.len()
    );

    let report = fit_event(log.geometry()?, &log.event, fit)?;
    report.print();

    if let Some(opath) = output_path {
        report.write(&log.scenario_name, log.seed, opath)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Fitting and reporting
// ---------------------------------------------------------------------------

struct FitReport {
    metrics: FitMetrics,
    elapsed_s: f64,
}

fn fit_event(
    geometry: Arc<TelescopeGeometry>,
    event: &ScenarioEvent,
    fit: &FitArgs,
) -> Result<FitReport> {
    let mut extensions = Extensions::with_calibrator(event.calibrator());
    if let Some(max_chi2) = fit.outlier_chi2 {
        extensions = extensions.outlier_finder(MeasurementChi2OutlierFinder { max_chi2 });
    }
    let options = Gx2FitterOptions {
        max_iterations: fit.iterations,
        delta_tolerance: fit.tolerance,
        ..Gx2FitterOptions::new(extensions)
    };
    let fitter = Gx2Fitter::new(StraightLinePropagator::new(geometry, fit.navigation.into()));

    let inputs = event.fit_inputs();
    let start = std::time::Instant::now();
    let results = fitter.fit_batch(&inputs, &options);
    let elapsed_s = start.elapsed().as_secs_f64();

    let mut metrics = FitMetrics::default();
    for (track, result) in event.tracks.iter().zip(&results) {
        match result {
            Ok(fitted) => metrics.accumulate(fitted, &track.truth().parameters),
            Err(err) => {
                warn!(%err, "fit failed");
                metrics.record_failure();
            }
        }
    }
    info!(tracks = inputs.len(), elapsed_s, "batch fitted");

    Ok(FitReport { metrics, elapsed_s })
}

impl FitReport {
    fn print(&self) {
        let m = &self.metrics;
        println!(
            "Done: {} fitted, {} failed, {} degraded, {} truncated, elapsed={:.3}s",
            m.n_fitted, m.n_failed, m.n_degraded, m.n_truncated, self.elapsed_s
        );
        println!("Mean chi2/ndf: {:.3}", m.mean_chi2_ndf());
        for (i, name) in PARAMETER_NAMES.iter().take(REDUCED_SIZE).enumerate() {
            println!(
                "  {:<6} rmse={:.3e}  pull rms={:.3}",
                name,
                m.rmse(i),
                m.pull_rms(i)
            );
        }
    }

    fn write(&self, scenario: &str, seed: u64, path: &Path) -> Result<()> {
        let m = &self.metrics;
        let json = serde_json::json!({
            "scenario": scenario,
            "seed": seed,
            "elapsed_s": self.elapsed_s,
            "efficiency": m.efficiency(),
            "mean_chi2_ndf": m.mean_chi2_ndf(),
            "rmse": (0..REDUCED_SIZE).map(|i| m.rmse(i)).collect::<Vec<_>>(),
            "pull_rms": (0..REDUCED_SIZE).map(|i| m.pull_rms(i)).collect::<Vec<_>>(),
            "metrics": m,
        });
        std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
        Ok(())
    }
}
