// src/signal/mod.rs
//
// Traffic-light phase programs and per-run green-time randomisation.
//
// - Phase / PhaseProgram: immutable view of one controller's phase program,
//   built once from the simulator's program logic + controlled lanes.
// - GreenTimeCache: memoised (min_green, max_green) per
//   (scenario, controller, phase), owned by one collection run.

pub mod phase;
pub mod randomize;

pub use phase::{is_green_state, Phase, PhaseProgram};
pub use randomize::{GreenTimeCache, GreenTimeRandomization, GreenWindow};
