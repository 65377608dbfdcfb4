//! calibration-runner: calibrate detector confidences against a persisted
//! calibration result.
//!
//! Usage:
//!   calibration-runner calibrate --confidence 0.35 0.72
//!   calibration-runner calibrate --result DIR --confidence 0.9 --sample-size 500 --seed 3
//!   calibration-runner calibrate --dump FILE.csv --confidence 0.6
//!   calibration-runner inspect --result DIR

mod config;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cv_calibrator::storage::{artifact_paths, load_distribution, load_metadata};
use cv_calibrator::ConformalEstimator;
use serde::Serialize;

use crate::config::RunnerConfig;

#[derive(Debug, Serialize)]
struct LabelCount<'a> {
    predicted_label: &'a str,
    observations: usize,
    detected: usize,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calibration_runner=info,cv_calibrator=info".into()),
        )
        .init();

    let config = RunnerConfig::from_env()?;
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("calibrate") => run_calibrate(&config, &args[2..]),
        Some("inspect") => run_inspect(&config, &args[2..]),
        _ => {
            eprintln!("Usage:");
            eprintln!("  calibration-runner calibrate --confidence C [C ...]   Calibrate raw confidences");
            eprintln!("  calibration-runner inspect                           Show a persisted result");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --result DIR       Calibration result directory (default: latest under CALIBRATION_OUTPUT_DIR)");
            eprintln!("  --dump FILE        Tabular dump to sample instead of a result directory");
            eprintln!("  --sample-size N    Calibration sample size (default: {})", config.sample_size);
            eprintln!("  --seed N           Sampling seed (default: {})", config.seed);
            std::process::exit(1);
        }
    }
}

fn run_calibrate(config: &RunnerConfig, args: &[String]) -> Result<()> {
    let confidences: Vec<f64> = flag_values(args, "--confidence")
        .iter()
        .map(|v| v.parse::<f64>().with_context(|| format!("invalid confidence '{}'", v)))
        .collect::<Result<_>>()?;
    if confidences.is_empty() {
        anyhow::bail!("at least one --confidence value is required");
    }

    let sample_size = match flag_value(args, "--sample-size") {
        Some(v) => v.parse::<usize>().context("--sample-size")?,
        None => config.sample_size,
    };
    let seed = match flag_value(args, "--seed") {
        Some(v) => v.parse::<u64>().context("--seed")?,
        None => config.seed,
    };

    let dump_path = match flag_value(args, "--dump") {
        Some(dump) => PathBuf::from(dump),
        None => {
            let result_dir = resolve_result_dir(config, args)?;
            let metadata = load_metadata(&result_dir)?;
            for mismatch in config.mismatches(&metadata) {
                tracing::warn!("{}: {}", result_dir.display(), mismatch);
            }
            artifact_paths(&result_dir)?.0
        }
    };

    tracing::info!(
        "Calibrating {} confidences against {} (sample_size={}, seed={})",
        confidences.len(),
        dump_path.display(),
        sample_size,
        seed
    );

    let estimator = ConformalEstimator::from_dump(&dump_path, sample_size, seed)
        .with_context(|| format!("failed to build estimator from {}", dump_path.display()))?;

    let calibrated = confidences
        .iter()
        .map(|&c| estimator.calibrate(c))
        .collect::<Result<Vec<_>, _>>()?;

    println!("{}", serde_json::to_string_pretty(&calibrated)?);
    Ok(())
}

fn run_inspect(config: &RunnerConfig, args: &[String]) -> Result<()> {
    let result_dir = resolve_result_dir(config, args)?;
    let metadata = load_metadata(&result_dir)
        .with_context(|| format!("failed to read metadata in {}", result_dir.display()))?;
    let mismatches = config.mismatches(&metadata);
    for mismatch in &mismatches {
        tracing::warn!("{}: {}", result_dir.display(), mismatch);
    }
    let (_, snapshot_path) = artifact_paths(&result_dir)?;
    let distribution = load_distribution(&snapshot_path)?;

    let counts: Vec<LabelCount> = distribution
        .buckets()
        .iter()
        .map(|b| LabelCount {
            predicted_label: &b.predicted_label,
            observations: b.observations.len(),
            detected: b.observations.iter().filter(|o| o.is_detected).count(),
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "directory": result_dir.display().to_string(),
            "metadata": metadata,
            "config_mismatches": mismatches,
            "total_observations": distribution.total_observations(),
            "labels": counts,
        }))?
    );
    Ok(())
}

fn resolve_result_dir(config: &RunnerConfig, args: &[String]) -> Result<PathBuf> {
    match flag_value(args, "--result") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => latest_result_dir(&config.output_dir)?.with_context(|| {
            format!("no calibration results under {}", config.output_dir.display())
        }),
    }
}

/// Most recent `calibration_result_*` directory; timestamps sort lexically
fn latest_result_dir(root: &Path) -> Result<Option<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("cannot read {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("calibration_result_"))
        })
        .collect();
    dirs.sort();
    Ok(dirs.pop())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    match args.iter().position(|a| a == flag) {
        Some(idx) => args[idx + 1..]
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(|s| s.as_str())
            .collect(),
        None => Vec::new(),
    }
}
