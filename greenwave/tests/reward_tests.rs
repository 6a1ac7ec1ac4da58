// tests/reward_tests.rs
//
// Counterfactual evaluation and the reward chain on snapshots produced by
// a real (synthetic-backend) generation run.

mod common;

use std::path::Path;

use greenwave::baseline::MaxPressure;
use greenwave::dataset::{generate, load_dataset, DataEntry, DATASET_FILE};
use greenwave::reward::{
    CounterfactualEvaluator, DecisionResponse, EvalTarget, FormatClass, RewardChain, RewardError,
};
use greenwave::sim::{LaunchSpec, SimAdapter};
use greenwave::telemetry::TelemetrySink;
use greenwave::{Config, Decision};

struct Fixture {
    _scenarios: tempfile::TempDir,
    _out: tempfile::TempDir,
    cfg: Config,
    network: std::path::PathBuf,
    entries: Vec<DataEntry>,
}

fn fixture() -> Fixture {
    let scenarios = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let network = common::write_scenario(scenarios.path(), "cross");
    let cfg = common::synthetic_config(scenarios.path());
    generate(&cfg, out.path(), &mut TelemetrySink::disabled()).unwrap();
    let entries = load_dataset(&out.path().join("cross").join(DATASET_FILE)).unwrap();
    assert!(!entries.is_empty());
    Fixture {
        _scenarios: scenarios,
        _out: out,
        cfg,
        network,
        entries,
    }
}

fn baseline_decision(cfg: &Config, e: &DataEntry) -> Decision {
    MaxPressure::new(cfg.baseline.clone())
        .decide(
            e.current_phase_id,
            &e.phase_metrics,
            e.current_green_elapsed,
            e.min_green,
            e.max_green,
        )
        .unwrap()
}

fn canonical(decision: Decision) -> String {
    DecisionResponse { decision }.to_canonical()
}

#[test]
fn restoring_a_snapshot_replays_identically() {
    let fx = fixture();
    let launch = LaunchSpec::new(&fx.network, &fx.cfg.simulator);
    let snapshot = Path::new(&fx.entries[0].state_file);

    let trace = || {
        let mut adapter = SimAdapter::from_spec(&launch);
        assert!(adapter.start_from_snapshot(snapshot));
        let mut out = vec![(adapter.time(), adapter.total_queue("J1"), adapter.phase_index("J1"))];
        for _ in 0..30 {
            adapter.step();
            out.push((adapter.time(), adapter.total_queue("J1"), adapter.phase_index("J1")));
        }
        adapter.close();
        out
    };
    let first = trace();
    let second = trace();
    assert_eq!(first[0].0, fx.entries[0].timestamp);
    assert_eq!(first, second);
}

#[test]
fn counterfactual_is_deterministic_and_bounded() {
    let fx = fixture();
    let launch = LaunchSpec::new(&fx.network, &fx.cfg.simulator);
    let eval = CounterfactualEvaluator::new(launch, fx.cfg.horizon_ticks(), 5.0, fx.cfg.reward.scale);
    let e = &fx.entries[0];
    let target = EvalTarget {
        snapshot: Path::new(&e.state_file),
        tls: &e.junction_id,
        phase_order: &e.phase_order,
    };

    for decision in [Decision::Extend, Decision::Switch] {
        let a = eval.evaluate(target, decision);
        let b = eval.evaluate(target, decision);
        assert!(a.success, "{:?}", a.error);
        assert_eq!(a, b);
        assert_eq!(a.delta, a.queue_after - a.queue_before);
        assert!((-1.0..=1.0).contains(&a.reward));
    }

    // Same action for model and baseline: no relative advantage.
    let rel = eval.evaluate_relative(target, Decision::Extend, Decision::Extend);
    let run = rel.baseline.as_ref().unwrap();
    assert_eq!(run.relative_reward, 0.0);
    assert_eq!(rel.simulation_score(), 0.0);
}

#[test]
fn corrupt_snapshot_fails_without_panicking() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ not json").unwrap();

    let launch = LaunchSpec::new(&fx.network, &fx.cfg.simulator);
    let eval = CounterfactualEvaluator::new(launch, 5, 5.0, 10.0);
    let r = eval.evaluate(
        EvalTarget {
            snapshot: &bad,
            tls: "J1",
            phase_order: &[0, 2],
        },
        Decision::Switch,
    );
    assert!(!r.success);
    assert_eq!(r.reward, 0.0);
    assert!(r.error.is_some());

    let r = eval.evaluate(
        EvalTarget {
            snapshot: Path::new(&fx.entries[0].state_file),
            tls: "J9",
            phase_order: &[],
        },
        Decision::Extend,
    );
    assert!(!r.success);
}

#[test]
fn chain_scores_every_sample_in_order() {
    let fx = fixture();
    let chain = RewardChain::new(fx.cfg.clone());

    let prompts: Vec<String> = fx.entries.iter().map(|e| e.prompt.clone()).collect();
    let states: Vec<String> = fx.entries.iter().map(|e| e.state_file.clone()).collect();
    let outputs: Vec<String> = (0..prompts.len())
        .map(|i| match i % 3 {
            0 => r#"{"extend": "yes"}"#.to_string(),
            1 => "Switching makes sense: extend = no".to_string(),
            _ => "hmm".to_string(),
        })
        .collect();

    let (breakdowns, stats) = chain.score_batch_detailed(&prompts, &outputs, &states).unwrap();
    assert_eq!(breakdowns.len(), prompts.len());
    assert_eq!(stats.total, prompts.len());
    assert_eq!(stats.simulation_failures, 0);

    for (i, b) in breakdowns.iter().enumerate() {
        match i % 3 {
            0 => assert_eq!(b.format, FormatClass::Strict),
            1 => assert_eq!(b.format, FormatClass::Partial),
            _ => {
                assert_eq!(b.format, FormatClass::Invalid);
                assert!(!b.simulated);
                assert_eq!(b.final_score, -1.0);
                continue;
            }
        }
        assert!(b.simulated);
        assert!(b.error.is_none(), "{:?}", b.error);
        assert!((-1.0..=1.0).contains(&b.simulation_score));
        let want = b.format_score + b.simulation_score;
        assert!((b.final_score - want).abs() < 1e-12);
    }

    // The parallel and sequential paths agree.
    let mut sequential = fx.cfg.clone();
    sequential.reward.parallelism = 1;
    let seq = RewardChain::new(sequential)
        .score_batch(&prompts, &outputs, &states)
        .unwrap();
    let par: Vec<f64> = breakdowns.iter().map(|b| b.final_score).collect();
    assert_eq!(seq, par);
}

#[test]
fn relative_mode_rewards_zero_for_baseline_answer() {
    let fx = fixture();
    let mut cfg = fx.cfg.clone();
    cfg.reward.enable_baseline = true;
    let chain = RewardChain::new(cfg.clone());

    for e in fx.entries.iter().take(4) {
        let answer = canonical(baseline_decision(&cfg, e));
        let b = chain.score(&e.prompt, &answer, &e.state_file);
        assert_eq!(b.format, FormatClass::Strict);
        assert_eq!(b.decision, b.baseline_decision);
        assert_eq!(b.simulation_score, 0.0);
        assert_eq!(b.final_score, 1.0);
    }
}

#[test]
fn strict_batch_fails_on_missing_snapshot() {
    let fx = fixture();
    let mut cfg = fx.cfg.clone();
    cfg.reward.strict_batch = true;
    cfg.reward.parallelism = 1;
    let chain = RewardChain::new(cfg);

    let e = &fx.entries[0];
    let err = chain
        .score_batch(
            &[e.prompt.clone(), e.prompt.clone()],
            &[canonical(Decision::Extend), canonical(Decision::Switch)],
            &[e.state_file.clone(), "/does/not/exist.json".to_string()],
        )
        .unwrap_err();
    match err {
        RewardError::SimulationFailed { index, message } => {
            assert_eq!(index, 1);
            assert!(message.contains("not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
