// src/dataset/writer.rs
//
// On-disk outputs of a generation run:
//
//   <out>/<scenario>/grpo_dataset.json   JSON array of DataEntry
//   <out>/<scenario>/states/             snapshot files (written by the collector)
//   <out>/generation_summary.json        per-scenario counts and status
//   <out>/manifest.json                  SHA-256 of every file above
//
// All JSON files are written atomically (temp file + rename) with stable
// field order so identical runs produce byte-identical outputs.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::collector::{CollectionOutcome, ScenarioStatus};
use super::entry::DataEntry;
use super::DATASET_FILE;
use crate::config::{hex_lower, Config};

const GREENWAVE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SUMMARY_FILE: &str = "generation_summary.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SUMMARY_SCHEMA: &str = "greenwave-generation-v1";

/// Per-scenario line of the generation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub status: ScenarioStatus,
    pub entries: usize,
    pub snapshots_saved: usize,
    pub decisions_seen: usize,
    pub decisions_dropped: usize,
    pub steps: u64,
    /// Dataset path relative to the output root; absent for failed scenarios.
    pub dataset_file: Option<String>,
}

impl ScenarioSummary {
    pub fn from_outcome(outcome: &CollectionOutcome, dataset_file: Option<String>) -> Self {
        Self {
            name: outcome.scenario.clone(),
            status: outcome.status,
            entries: outcome.entries.len(),
            snapshots_saved: outcome.snapshots_saved,
            decisions_seen: outcome.decisions_seen,
            decisions_dropped: outcome.decisions_dropped,
            steps: outcome.steps,
            dataset_file,
        }
    }
}

/// `generation_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub schema_version: String,
    pub greenwave_version: String,
    pub config_fingerprint: String,
    pub total_entries: usize,
    pub failed_scenarios: usize,
    pub scenarios: Vec<ScenarioSummary>,
}

/// One hashed artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArtifactEntry {
    /// Path relative to the output root, forward slashes.
    pub path: String,
    pub sha256: String,
}

/// `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub generated_at_unix_ms: u64,
    pub greenwave_version: String,
    pub config_fingerprint: String,
    /// Sorted by path; excludes the manifest itself.
    pub artifacts: Vec<ArtifactEntry>,
}

/// SHA-256 of a file via streaming reads, as `sha256:<hex>`.
pub fn hash_file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("sha256:{}", hex_lower(&hasher.finalize())))
}

/// Write data to a file atomically (temp file in the same directory, then rename).
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(&temp_name);

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    bytes.push(b'\n');
    atomic_write(path, &bytes)
}

/// Write one scenario's `grpo_dataset.json`; returns its path.
pub fn write_scenario_dataset(out_dir: &Path, scenario: &str, entries: &[DataEntry]) -> Result<PathBuf> {
    let path = out_dir.join(scenario).join(DATASET_FILE);
    write_json(&path, &entries)?;
    Ok(path)
}

/// Read a dataset file back.
pub fn load_dataset(path: &Path) -> Result<Vec<DataEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid dataset JSON: {}", path.display()))
}

/// Write every scenario dataset, the summary and the manifest.
pub fn write_generation_outputs(
    out_dir: &Path,
    cfg: &Config,
    outcomes: &[CollectionOutcome],
) -> Result<GenerationSummary> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output dir: {}", out_dir.display()))?;

    let mut scenarios = Vec::with_capacity(outcomes.len());
    let mut artifacts = Vec::new();
    for outcome in outcomes {
        let dataset_file = if outcome.status.is_failure() {
            None
        } else {
            let path = write_scenario_dataset(out_dir, &outcome.scenario, &outcome.entries)?;
            let rel = format!("{}/{}", outcome.scenario, DATASET_FILE);
            artifacts.push(ArtifactEntry {
                path: rel.clone(),
                sha256: hash_file_sha256(&path)?,
            });
            Some(rel)
        };
        scenarios.push(ScenarioSummary::from_outcome(outcome, dataset_file));
    }

    let fingerprint = cfg.fingerprint();
    let summary = GenerationSummary {
        schema_version: SUMMARY_SCHEMA.to_string(),
        greenwave_version: GREENWAVE_VERSION.to_string(),
        config_fingerprint: fingerprint.clone(),
        total_entries: scenarios.iter().map(|s| s.entries).sum(),
        failed_scenarios: scenarios.iter().filter(|s| s.status.is_failure()).count(),
        scenarios,
    };
    let summary_path = out_dir.join(SUMMARY_FILE);
    write_json(&summary_path, &summary)?;
    artifacts.push(ArtifactEntry {
        path: SUMMARY_FILE.to_string(),
        sha256: hash_file_sha256(&summary_path)?,
    });
    artifacts.sort();

    let generated_at_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let manifest = Manifest {
        schema_version: SUMMARY_SCHEMA.to_string(),
        generated_at_unix_ms,
        greenwave_version: GREENWAVE_VERSION.to_string(),
        config_fingerprint: fingerprint,
        artifacts,
    };
    write_json(&out_dir.join(MANIFEST_FILE), &manifest)?;

    Ok(summary)
}

/// Re-hash every artifact listed in `<out_dir>/manifest.json`.
///
/// Returns the paths whose hash no longer matches (or that are missing).
pub fn verify_manifest(out_dir: &Path) -> Result<Vec<String>> {
    let path = out_dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&text)
        .with_context(|| format!("Invalid manifest JSON: {}", path.display()))?;

    let mut mismatched = Vec::new();
    for artifact in &manifest.artifacts {
        let file = out_dir.join(&artifact.path);
        match hash_file_sha256(&file) {
            Ok(h) if h == artifact.sha256 => {}
            _ => mismatched.push(artifact.path.clone()),
        }
    }
    Ok(mismatched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: ScenarioStatus) -> CollectionOutcome {
        CollectionOutcome::empty(name, status)
    }

    #[test]
    fn hash_has_prefix_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        fs::write(&p, b"abc").unwrap();
        let h = hash_file_sha256(&p).unwrap();
        assert_eq!(
            h,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn outputs_and_manifest_written() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::default();
        let outcomes = vec![
            outcome("alpha", ScenarioStatus::Completed),
            outcome("ghost", ScenarioStatus::MissingConfig),
        ];
        let summary = write_generation_outputs(dir.path(), &cfg, &outcomes).unwrap();
        assert_eq!(summary.failed_scenarios, 1);
        assert_eq!(summary.scenarios[0].dataset_file.as_deref(), Some("alpha/grpo_dataset.json"));
        assert!(summary.scenarios[1].dataset_file.is_none());

        let entries = load_dataset(&dir.path().join("alpha").join(DATASET_FILE)).unwrap();
        assert!(entries.is_empty());
        assert!(!dir.path().join("ghost").join(DATASET_FILE).exists());

        assert!(verify_manifest(dir.path()).unwrap().is_empty());
        fs::write(dir.path().join("alpha").join(DATASET_FILE), "[]\n\n").unwrap();
        assert_eq!(verify_manifest(dir.path()).unwrap(), vec!["alpha/grpo_dataset.json".to_string()]);
    }
}
