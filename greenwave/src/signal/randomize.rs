// src/signal/randomize.rs
//
// Green-time randomisation for dataset diversity.
//
// Each (scenario, controller, phase) gets one (min_green, max_green) window,
// sampled on first use and memoised for the rest of the run. The memoised
// window, not the static program, is authoritative for decision-point and
// constraint checks during that run.
//
// Sampling is deterministic given the run seed and the key, independent of
// the order in which keys are first requested.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::types::PhaseIndex;

/// Randomisation ranges for green-time windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GreenTimeRandomization {
    /// Master switch. When off, every phase uses its static min/max.
    pub enabled: bool,
    /// Probability that a given phase is randomised at all.
    pub probability: f64,
    /// Range for the randomised minimum green (s).
    pub min_green_range: (f64, f64),
    /// Range for the randomised maximum green (s).
    pub max_green_range: (f64, f64),
}

impl Default for GreenTimeRandomization {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 1.0,
            min_green_range: (5.0, 15.0),
            max_green_range: (30.0, 60.0),
        }
    }
}

impl GreenTimeRandomization {
    /// No randomisation: static program windows only.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validate ranges; returns `(field, message)` on failure.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err((
                "probability",
                format!("must be in [0, 1], got {}", self.probability),
            ));
        }
        for (field, range) in [
            ("min_green_range", self.min_green_range),
            ("max_green_range", self.max_green_range),
        ] {
            if !(range.0.is_finite() && range.1.is_finite()) || range.0 < 0.0 || range.0 > range.1 {
                return Err((
                    field,
                    format!("expected 0 <= lo <= hi, got ({}, {})", range.0, range.1),
                ));
            }
        }
        Ok(())
    }
}

/// Effective green window for one phase during one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreenWindow {
    pub min_green: f64,
    pub max_green: f64,
    /// Whether this window came from randomisation rather than the program.
    pub randomized: bool,
}

type CacheKey = (String, String, PhaseIndex);

/// Memoised green windows for one generation run.
#[derive(Debug, Clone)]
pub struct GreenTimeCache {
    config: GreenTimeRandomization,
    seed: u64,
    entries: HashMap<CacheKey, GreenWindow>,
}

impl GreenTimeCache {
    pub fn new(config: GreenTimeRandomization, seed: u64) -> Self {
        Self {
            config,
            seed,
            entries: HashMap::new(),
        }
    }

    /// Return the memoised window for this key, sampling it on first use.
    pub fn window(&mut self, scenario: &str, tls_id: &str, phase: &Phase) -> GreenWindow {
        let key = (scenario.to_string(), tls_id.to_string(), phase.index);
        if let Some(w) = self.entries.get(&key) {
            return *w;
        }
        let w = self.sample(&key, phase);
        self.entries.insert(key, w);
        w
    }

    /// Number of memoised windows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sample(&self, key: &CacheKey, phase: &Phase) -> GreenWindow {
        let static_window = GreenWindow {
            min_green: phase.min_dur,
            max_green: phase.max_dur.max(phase.min_dur),
            randomized: false,
        };
        if !self.config.enabled {
            return static_window;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ key_hash(key));
        if rng.gen::<f64>() >= self.config.probability {
            return static_window;
        }

        let min_green = sample_range(&mut rng, self.config.min_green_range);
        let max_green = sample_range(&mut rng, self.config.max_green_range).max(min_green);
        GreenWindow {
            min_green,
            max_green,
            randomized: true,
        }
    }
}

fn sample_range(rng: &mut ChaCha8Rng, range: (f64, f64)) -> f64 {
    if range.0 >= range.1 {
        return range.0;
    }
    rng.gen_range(range.0..=range.1)
}

fn key_hash(key: &CacheKey) -> u64 {
    fnv1a(&[key.0.as_str(), key.1.as_str(), &key.2.to_string()])
}

/// FNV-1a over `parts`, separated by a unit separator. Stable across
/// platforms and runs.
pub(crate) fn fnv1a(parts: &[&str]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            h ^= 0x1f;
            h = h.wrapping_mul(FNV_PRIME);
        }
        for b in part.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(index: PhaseIndex) -> Phase {
        Phase {
            index,
            state: "GGrr".to_string(),
            duration: 30.0,
            min_dur: 12.0,
            max_dur: 45.0,
            lanes: vec!["a_0".to_string()],
        }
    }

    #[test]
    fn disabled_uses_static_program() {
        let mut cache = GreenTimeCache::new(GreenTimeRandomization::disabled(), 1);
        let w = cache.window("s", "J1", &phase(0));
        assert_eq!(w.min_green, 12.0);
        assert_eq!(w.max_green, 45.0);
        assert!(!w.randomized);
    }

    #[test]
    fn window_is_memoised() {
        let mut cache = GreenTimeCache::new(GreenTimeRandomization::default(), 9);
        let a = cache.window("s", "J1", &phase(0));
        let b = cache.window("s", "J1", &phase(0));
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sampling_is_order_independent() {
        let cfg = GreenTimeRandomization::default();
        let mut c1 = GreenTimeCache::new(cfg.clone(), 42);
        let a0 = c1.window("s", "J1", &phase(0));
        let a2 = c1.window("s", "J1", &phase(2));

        let mut c2 = GreenTimeCache::new(cfg, 42);
        let b2 = c2.window("s", "J1", &phase(2));
        let b0 = c2.window("s", "J1", &phase(0));

        assert_eq!(a0, b0);
        assert_eq!(a2, b2);
    }

    #[test]
    fn sampled_windows_within_ranges() {
        let cfg = GreenTimeRandomization::default();
        let mut cache = GreenTimeCache::new(cfg.clone(), 3);
        for i in 0..50 {
            let w = cache.window("s", &format!("J{i}"), &phase(0));
            assert!(w.randomized);
            assert!(w.min_green >= cfg.min_green_range.0 && w.min_green <= cfg.min_green_range.1);
            assert!(w.max_green >= w.min_green);
            assert!(w.max_green <= cfg.max_green_range.1);
        }
    }

    #[test]
    fn zero_probability_never_randomizes() {
        let cfg = GreenTimeRandomization {
            probability: 0.0,
            ..GreenTimeRandomization::default()
        };
        let mut cache = GreenTimeCache::new(cfg, 5);
        for i in 0..20 {
            assert!(!cache.window("s", "J1", &phase(i)).randomized);
        }
    }
}
