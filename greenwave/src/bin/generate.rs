// src/bin/generate.rs
//
// Dataset generation runner.
//
// Usage:
//   generate --config greenwave.yaml --out-dir data/
//   generate --backend synthetic --scenario-root scenarios/ --out-dir data/ -v

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};

use greenwave::config::{Config, SimBackend};
use greenwave::dataset::generate;
use greenwave::dataset::writer::verify_manifest;
use greenwave::telemetry::TelemetrySink;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Sumo,
    Synthetic,
}

#[derive(Debug, Parser)]
#[command(
    name = "generate",
    about = "Collect decision-point training data from traffic scenarios",
    version
)]
struct Args {
    /// YAML config file. Defaults plus GREENWAVE_* overrides when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output root; one sub-directory per scenario.
    #[arg(long, default_value = "data")]
    out_dir: PathBuf,

    /// Simulator backend (overrides the config file).
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Directory scanned for scenario sub-directories.
    #[arg(long)]
    scenario_root: Option<PathBuf>,

    /// Scenario worker count.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Collection seed (randomised green windows and sampling filter).
    #[arg(long)]
    seed: Option<u64>,

    /// Re-hash every written artifact against the manifest.
    #[arg(long)]
    verify: bool,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut cfg = Config::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(b) = args.backend {
        cfg.simulator.backend = match b {
            BackendArg::Sumo => SimBackend::Sumo,
            BackendArg::Synthetic => SimBackend::Synthetic,
        };
    }
    if let Some(root) = args.scenario_root {
        cfg.scenario_root = Some(root);
    }
    if let Some(p) = args.parallelism {
        cfg.collection.parallelism = p;
    }
    if let Some(seed) = args.seed {
        cfg.collection.seed = seed;
    }
    cfg.validate().context("Invalid config after CLI overrides")?;

    println!(
        "generate | cfg={} | fingerprint={} | backend={} | out={} | workers={} | seed={}",
        cfg.version,
        &cfg.fingerprint()[..16],
        cfg.simulator.backend.as_str(),
        args.out_dir.display(),
        cfg.collection.parallelism,
        cfg.collection.seed
    );

    let mut telemetry = TelemetrySink::from_env();
    let summary = generate(&cfg, &args.out_dir, &mut telemetry)?;

    for s in &summary.scenarios {
        println!(
            "  {:<24} {:<14} entries={:<6} snapshots={:<6} steps={}",
            s.name,
            s.status.as_str(),
            s.entries,
            s.snapshots_saved,
            s.steps
        );
    }
    println!(
        "total_entries={} failed_scenarios={}",
        summary.total_entries, summary.failed_scenarios
    );

    if args.verify {
        let mismatched = verify_manifest(&args.out_dir)?;
        if !mismatched.is_empty() {
            bail!("manifest verification failed for: {}", mismatched.join(", "));
        }
        println!("manifest verified");
    }

    if summary.failed_scenarios == summary.scenarios.len() {
        bail!("every scenario failed");
    }
    Ok(())
}
