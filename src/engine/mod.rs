//! Simulation engine - paced rounds, short-circuit latch and run statistics.

pub mod cadence;
pub mod config;
pub mod short_circuit;
pub mod stats;

pub use cadence::{CadenceLoop, FnRound, Phase, RoundBody, RoundOutcome, RunState, RunWindow, pacing_delta};
pub use config::{DEFAULT_REQUIRED_EMPTY_ROUNDS, DEFAULT_SHORT_CIRCUIT_CHECK_ROUND, RunConfig};
pub use short_circuit::ShortCircuitDetector;
pub use stats::{RunLabels, RunStats, RunSummary, RunTiming, delta_secs};
