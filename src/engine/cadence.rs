//! Cadence loop - runs a fixed number of rounds at a target interval.
//!
//! Each round runs the caller's body, measures how long it took, and sleeps
//! whatever is left of the nominal interval. Rounds run one after another on
//! the current task; the pacing sleep is the only suspension point the loop
//! adds, and an overrunning round simply starts the next one late.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};

use crate::engine::config::RunConfig;
use crate::engine::short_circuit::ShortCircuitDetector;
use crate::engine::stats::{RunLabels, RunStats, RunSummary, RunTiming, delta_secs};
use crate::error::Result;
use crate::sleeper::Sleeper;
use crate::transport::OperationCounter;

/// What one round's work produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Units of simulated work found or handled this round
    pub units: u64,
    /// Whether the round counts toward the short-circuit streak
    pub empty: bool,
}

impl RoundOutcome {
    /// Outcome whose emptiness is `units == 0`.
    pub fn new(units: u64) -> Self {
        Self { units, empty: units == 0 }
    }

    /// Outcome whose emptiness is decided by the round body.
    pub fn with_empty(units: u64, empty: bool) -> Self {
        Self { units, empty }
    }
}

/// One round of simulated work across all actors.
#[async_trait]
pub trait RoundBody: Send {
    /// Run round `round` (1-based). An error aborts the whole run.
    async fn run_round(&mut self, round: u32) -> Result<RoundOutcome>;
}

/// Adapts a synchronous closure into a `RoundBody`.
pub struct FnRound<F>(pub F);

#[async_trait]
impl<F> RoundBody for FnRound<F>
where
    F: FnMut(u32) -> Result<RoundOutcome> + Send,
{
    async fn run_round(&mut self, round: u32) -> Result<RoundOutcome> {
        (self.0)(round)
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running(u32),
    Draining,
    Done,
}

/// Mutable state owned by the loop for one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: Phase,
    pub detector: ShortCircuitDetector,
    pub stats: RunStats,
}

impl RunState {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            phase: Phase::Idle,
            detector: ShortCircuitDetector::new(config.short_circuit_check_round(), config.required_empty_rounds()),
            stats: RunStats::new(),
        }
    }

    pub fn round(&self) -> u32 {
        match self.phase {
            Phase::Running(round) => round,
            _ => self.stats.rounds(),
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Nominal interval minus elapsed round time; negative when the round overran.
pub fn pacing_delta(nominal: Duration, elapsed: Duration) -> TimeDelta {
    let nominal = to_delta(nominal);
    let elapsed = to_delta(elapsed);
    nominal.checked_sub(&elapsed).unwrap_or(TimeDelta::MIN)
}

/// Clock, operation window and round state of one measured run.
#[derive(Debug)]
pub struct RunWindow {
    started_at: DateTime<Local>,
    clock: Instant,
    state: RunState,
}

impl RunWindow {
    pub fn state(&self) -> &RunState {
        &self.state
    }
}

/// Drives rounds at the configured cadence.
pub struct CadenceLoop {
    config: RunConfig,
    sleeper: Arc<dyn Sleeper>,
    labels: RunLabels,
}

impl CadenceLoop {
    pub fn new(config: RunConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            config,
            sleeper,
            labels: RunLabels::default(),
        }
    }

    pub fn with_labels(mut self, labels: RunLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// How long to sleep after a round, if at all.
    fn sleep_for(&self, delta: TimeDelta, state: &RunState) -> Option<Duration> {
        if self.config.no_sleep() || state.detector.is_short_circuited() {
            return None;
        }
        delta.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Start the measured window: reset `ops` and start the clock.
    ///
    /// Work done between `open` and `close` (registration, cleanup) counts
    /// toward wall clock, operations and seconds per operation, but only the
    /// rounds feed the unit and pacing statistics.
    pub fn open(&self, ops: &OperationCounter) -> RunWindow {
        ops.reset();
        RunWindow {
            started_at: Local::now(),
            clock: Instant::now(),
            state: RunState::new(&self.config),
        }
    }

    /// Run every round inside `window`. The first error from the body aborts.
    pub async fn run_rounds<B>(&self, body: &mut B, window: &mut RunWindow) -> Result<()>
    where
        B: RoundBody + ?Sized,
    {
        let total = self.config.total_rounds();
        let nominal = self.config.nominal_interval();
        let state = &mut window.state;
        log::info!(
            "Starting run: {} {} every {}s",
            total,
            self.labels.round_label,
            self.config.nominal_interval_secs()
        );

        for round in 1..=total {
            state.phase = Phase::Running(round);
            let round_start = Instant::now();

            let outcome = body.run_round(round).await?;

            let elapsed = round_start.elapsed();
            let delta = pacing_delta(nominal, elapsed);
            state.stats.record_units(outcome.units);
            state.stats.record_pacing(delta);

            if state.detector.observe(round, outcome.empty) {
                log::info!(
                    "Short-circuit at round {} of {}: {} consecutive empty rounds, no more pacing sleeps",
                    round,
                    total,
                    state.detector.consecutive_empty()
                );
            }

            if let Some(sleep) = self.sleep_for(delta, state) {
                log::info!(
                    "Sleeping for {:.6} seconds at the end of round {} of {} because it finished early",
                    sleep.as_secs_f64(),
                    round,
                    total
                );
                state.stats.record_sleep(round, sleep);
                self.sleeper.sleep(sleep).await;
            } else {
                log::debug!("Round {} of {} pacing delta {:.6}s, not sleeping", round, total, delta_secs(delta));
            }
        }

        state.phase = Phase::Draining;
        Ok(())
    }

    /// Stop the clock, read `ops` and build the summary.
    pub fn close(&self, window: RunWindow, ops: &OperationCounter) -> RunSummary {
        let RunWindow {
            started_at,
            clock,
            mut state,
        } = window;
        let timing = RunTiming {
            labels: self.labels.clone(),
            started_at,
            finished_at: Local::now(),
            wall_clock: clock.elapsed(),
            short_circuited_at: state.detector.latched_at(),
        };
        let summary = state.stats.summarize(timing, self.config.total_rounds(), ops.get());
        state.phase = Phase::Done;
        log::info!("Run finished after {} rounds", state.round());
        summary
    }

    /// Run every round, then summarize; the window covers the rounds only.
    pub async fn run<B>(&self, body: &mut B, ops: &OperationCounter) -> Result<RunSummary>
    where
        B: RoundBody + ?Sized,
    {
        let mut window = self.open(ops);
        self.run_rounds(body, &mut window).await?;
        Ok(self.close(window, ops))
    }
}
