// tests/cli_tests.rs
//
// The generate and score binaries, driven as subprocesses.

mod common;

use std::fs;
use std::process::Command;

const ENV_OVERRIDES: &[&str] = &[
    "GREENWAVE_DECISION_INTERVAL",
    "GREENWAVE_WARMUP_STEPS",
    "GREENWAVE_PARALLELISM",
    "GREENWAVE_REWARD_SCALE",
    "GREENWAVE_SUMO_BINARY",
    "GREENWAVE_BACKEND",
    "GREENWAVE_ENABLE_BASELINE",
    "GREENWAVE_TELEMETRY_MODE",
];

fn command(bin: &str) -> Command {
    let mut cmd = Command::new(bin);
    for name in ENV_OVERRIDES {
        cmd.env_remove(name);
    }
    cmd
}

#[test]
fn generate_then_score_from_the_command_line() {
    let scenarios = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    common::write_scenario(scenarios.path(), "cross");

    let cfg = common::synthetic_config(scenarios.path());
    let cfg_path = work.path().join("greenwave.yaml");
    fs::write(&cfg_path, serde_yaml::to_string(&cfg).unwrap()).unwrap();
    let out_dir = work.path().join("data");

    let output = command(env!("CARGO_BIN_EXE_generate"))
        .arg("--config")
        .arg(&cfg_path)
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--verify")
        .output()
        .expect("failed to run generate binary");
    assert!(
        output.status.success(),
        "generate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("backend=synthetic"), "missing backend: {stdout}");
    assert!(stdout.contains("manifest verified"), "missing verify line: {stdout}");

    let dataset = out_dir.join("cross").join("grpo_dataset.json");
    assert!(dataset.exists());

    let report = work.path().join("report.json");
    let output = command(env!("CARGO_BIN_EXE_score"))
        .arg("--config")
        .arg(&cfg_path)
        .arg("--dataset")
        .arg(&dataset)
        .arg("--constant")
        .arg("yes")
        .arg("--report")
        .arg(&report)
        .output()
        .expect("failed to run score binary");
    assert!(
        output.status.success(),
        "score failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("accuracy=1.000"), "constant answers are strict: {stdout}");

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    let n = greenwave::dataset::load_dataset(&dataset).unwrap().len();
    assert_eq!(report["samples"].as_array().unwrap().len(), n);
    assert_eq!(report["batch"]["total"], n);
    assert_eq!(report["batch"]["simulation_failures"], 0);
}

#[test]
fn generate_fails_when_every_scenario_fails() {
    let work = tempfile::tempdir().unwrap();
    let mut cfg = greenwave::Config::default();
    cfg.simulator.backend = greenwave::SimBackend::Synthetic;
    cfg.scenarios
        .push(common::scenario("ghost", work.path().join("ghost/network.yaml")));
    let cfg_path = work.path().join("greenwave.yaml");
    fs::write(&cfg_path, serde_yaml::to_string(&cfg).unwrap()).unwrap();

    let output = command(env!("CARGO_BIN_EXE_generate"))
        .arg("--config")
        .arg(&cfg_path)
        .arg("--out-dir")
        .arg(work.path().join("data"))
        .output()
        .expect("failed to run generate binary");
    assert!(!output.status.success());
    assert!(work.path().join("data").join("generation_summary.json").exists());
}

#[test]
fn invalid_config_is_rejected() {
    let work = tempfile::tempdir().unwrap();
    let cfg_path = work.path().join("bad.yaml");
    fs::write(&cfg_path, "decision:\n  decision_interval: -5\n").unwrap();

    let output = command(env!("CARGO_BIN_EXE_generate"))
        .arg("--config")
        .arg(&cfg_path)
        .arg("--out-dir")
        .arg(work.path().join("data"))
        .output()
        .expect("failed to run generate binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("decision.decision_interval"), "{stderr}");
}
