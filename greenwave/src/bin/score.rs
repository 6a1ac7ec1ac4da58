// src/bin/score.rs
//
// Batch reward scoring.
//
// Scores policy outputs against a generated dataset. Outputs come from a
// JSON array of strings (one per dataset entry, same order) or from a
// constant answer for every entry.
//
// Usage:
//   score --dataset data/grid/grpo_dataset.json --outputs completions.json
//   score --dataset data/grid/grpo_dataset.json --constant yes --report report.json

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde_json::json;

use greenwave::dataset::load_dataset;
use greenwave::reward::{DecisionResponse, RewardChain};
use greenwave::telemetry::{batch_record, reward_record, TelemetrySink};
use greenwave::Decision;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AnswerArg {
    Yes,
    No,
}

#[derive(Debug, Parser)]
#[command(
    name = "score",
    about = "Score policy outputs with the counterfactual reward chain",
    version
)]
struct Args {
    /// YAML config file (must list the dataset's scenarios).
    #[arg(long)]
    config: Option<PathBuf>,

    /// `grpo_dataset.json` produced by `generate`.
    #[arg(long)]
    dataset: PathBuf,

    /// JSON array of model outputs, one per dataset entry.
    #[arg(long, conflicts_with = "constant")]
    outputs: Option<PathBuf>,

    /// Answer every entry with the same canonical output.
    #[arg(long, value_enum)]
    constant: Option<AnswerArg>,

    /// Compare against max-pressure instead of scoring absolutely.
    #[arg(long)]
    relative: bool,

    /// Abort on the first simulation failure.
    #[arg(long)]
    strict: bool,

    /// Write per-sample and batch records to this JSON file.
    #[arg(long)]
    report: Option<PathBuf>,

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

    let mut cfg = greenwave::Config::load(args.config.as_deref()).context("Failed to load config")?;
    if args.relative {
        cfg.reward.enable_baseline = true;
    }
    if args.strict {
        cfg.reward.strict_batch = true;
    }

    let entries = load_dataset(&args.dataset)?;
    let outputs: Vec<String> = match (&args.outputs, args.constant) {
        (Some(path), _) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read outputs: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Outputs must be a JSON array of strings: {}", path.display()))?
        }
        (None, Some(answer)) => {
            let decision = match answer {
                AnswerArg::Yes => Decision::Extend,
                AnswerArg::No => Decision::Switch,
            };
            vec![DecisionResponse { decision }.to_canonical(); entries.len()]
        }
        (None, None) => bail!("pass either --outputs or --constant"),
    };

    let prompts: Vec<String> = entries.iter().map(|e| e.prompt.clone()).collect();
    let state_files: Vec<String> = entries.iter().map(|e| e.state_file.clone()).collect();

    let chain = RewardChain::new(cfg);
    let (breakdowns, stats) = chain.score_batch_detailed(&prompts, &outputs, &state_files)?;

    let mut telemetry = TelemetrySink::from_env();
    let records: Vec<serde_json::Value> = breakdowns
        .iter()
        .enumerate()
        .map(|(i, b)| reward_record(i, b))
        .collect();
    for r in &records {
        telemetry.log_json(r);
    }
    let batch = batch_record(&stats);
    telemetry.log_json(&batch);
    telemetry.flush();

    println!(
        "score | n={} | strict={} partial={} invalid={} | accuracy={:.3} | mean_final={:.4} | sim_failures={} ({:.1}%)",
        stats.total,
        stats.strict,
        stats.partial,
        stats.invalid,
        stats.format_accuracy,
        stats.mean_final_score,
        stats.simulation_failures,
        stats.simulation_failure_rate * 100.0
    );
    if let Some(rate) = stats.baseline_agreement_rate {
        println!("baseline_agreement={rate:.3}");
    }

    if let Some(path) = &args.report {
        let report = json!({ "samples": records, "batch": batch });
        let text = serde_json::to_string_pretty(&report)?;
        fs::write(path, text + "\n")
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }
    Ok(())
}
