//! Run statistics: per-round unit counts, pacing drift and sleep totals.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};

/// Names used when rendering a summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    /// Simulated actors per round
    pub actors: u32,
    /// Plural noun for an actor, e.g. "agbots"
    pub actor_kind: String,
    /// Plural noun for a round, e.g. "agreement checks"
    pub round_label: String,
}

impl Default for RunLabels {
    fn default() -> Self {
        Self {
            actors: 1,
            actor_kind: "actors".to_string(),
            round_label: "rounds".to_string(),
        }
    }
}

impl RunLabels {
    pub fn new(actors: u32, actor_kind: impl Into<String>, round_label: impl Into<String>) -> Self {
        Self {
            actors,
            actor_kind: actor_kind.into(),
            round_label: round_label.into(),
        }
    }
}

/// Accumulates per-round observations for the whole run.
#[derive(Debug, Clone)]
pub struct RunStats {
    rounds: u32,
    min_processed: Option<u64>,
    max_processed: u64,
    last_processed: u64,
    total_processed: u64,
    pacing_delta: TimeDelta,
    slept: Duration,
    slept_rounds: Vec<u32>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            rounds: 0,
            min_processed: None,
            max_processed: 0,
            last_processed: 0,
            total_processed: 0,
            pacing_delta: TimeDelta::zero(),
            slept: Duration::ZERO,
            slept_rounds: Vec::new(),
        }
    }

    pub fn record_units(&mut self, units: u64) {
        self.rounds += 1;
        self.min_processed = Some(self.min_processed.map_or(units, |m| m.min(units)));
        self.max_processed = self.max_processed.max(units);
        self.last_processed = units;
        self.total_processed = self.total_processed.saturating_add(units);
    }

    /// Signed; overruns pull the total negative.
    pub fn record_pacing(&mut self, delta: TimeDelta) {
        self.pacing_delta = self.pacing_delta.checked_add(&delta).unwrap_or(self.pacing_delta);
    }

    pub fn record_sleep(&mut self, round: u32, duration: Duration) {
        self.slept = self.slept.saturating_add(duration);
        self.slept_rounds.push(round);
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// `None` until the first round has been recorded.
    pub fn min_processed(&self) -> Option<u64> {
        self.min_processed
    }

    pub fn max_processed(&self) -> u64 {
        self.max_processed
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    pub fn pacing_delta(&self) -> TimeDelta {
        self.pacing_delta
    }

    pub fn slept(&self) -> Duration {
        self.slept
    }

    /// Build the final summary over `total_rounds` configured rounds.
    pub fn summarize(&self, timing: RunTiming, total_rounds: u32, operations: u64) -> RunSummary {
        let divisor = total_rounds.max(1);
        let active = timing.wall_clock.saturating_sub(self.slept);
        let secs_per_op = if operations == 0 {
            0.0
        } else {
            active.as_secs_f64() / operations as f64
        };

        RunSummary {
            labels: timing.labels,
            total_rounds,
            total_processed: self.total_processed,
            min_processed: self.min_processed.unwrap_or(0),
            max_processed: self.max_processed,
            last_processed: self.last_processed,
            avg_units_per_round: self.total_processed as f64 / divisor as f64,
            started_at: timing.started_at,
            finished_at: timing.finished_at,
            wall_clock: timing.wall_clock,
            slept: self.slept,
            active,
            operations,
            secs_per_op,
            avg_pacing_drift: self.pacing_delta / i32::try_from(divisor).unwrap_or(i32::MAX),
            short_circuited_at: timing.short_circuited_at,
            slept_rounds: self.slept_rounds.clone(),
            notes: Vec::new(),
        }
    }
}

/// Timing and labelling the loop hands to `RunStats::summarize`.
#[derive(Debug, Clone)]
pub struct RunTiming {
    pub labels: RunLabels,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub wall_clock: Duration,
    pub short_circuited_at: Option<u32>,
}

/// Computed end-of-run figures.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub labels: RunLabels,
    pub total_rounds: u32,
    pub total_processed: u64,
    pub min_processed: u64,
    pub max_processed: u64,
    pub last_processed: u64,
    pub avg_units_per_round: f64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub wall_clock: Duration,
    pub slept: Duration,
    /// Wall clock minus pacing sleep
    pub active: Duration,
    /// Physical attempts, retries included
    pub operations: u64,
    pub secs_per_op: f64,
    pub avg_pacing_drift: TimeDelta,
    pub short_circuited_at: Option<u32>,
    /// Rounds that ended with a pacing sleep
    pub slept_rounds: Vec<u32>,
    /// Driver-specific lines rendered after the unit counts
    pub notes: Vec<String>,
}

impl RunSummary {
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn avg_pacing_drift_secs(&self) -> f64 {
        delta_secs(self.avg_pacing_drift)
    }
}

/// Seconds in a signed delta.
pub fn delta_secs(delta: TimeDelta) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

const TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Simulated {} {} for {} {}",
            self.labels.actors, self.labels.actor_kind, self.total_rounds, self.labels.round_label
        )?;
        writeln!(
            f,
            "Units processed: total={}, avg={:.6}/round, max={}, min={}, last={}",
            self.total_processed, self.avg_units_per_round, self.max_processed, self.min_processed, self.last_processed
        )?;
        for note in &self.notes {
            writeln!(f, "{}", note)?;
        }
        writeln!(
            f,
            "Start time: {}, End time: {}, wall clock duration={:.6} s",
            self.started_at.format(TIME_FORMAT),
            self.finished_at.format(TIME_FORMAT),
            self.wall_clock.as_secs_f64()
        )?;
        writeln!(
            f,
            "Overall: active time: {:.6} s, num ops={}, avg={:.6} s/op, avg iteration delta={:.6} s",
            self.active.as_secs_f64(),
            self.operations,
            self.secs_per_op,
            self.avg_pacing_drift_secs()
        )?;
        match self.short_circuited_at {
            Some(round) => write!(f, "Short-circuit: round {}", round),
            None => write!(f, "Short-circuit: never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(wall_clock: Duration) -> RunTiming {
        let now = Local::now();
        RunTiming {
            labels: RunLabels::new(2, "agbots", "agreement checks"),
            started_at: now,
            finished_at: now,
            wall_clock,
            short_circuited_at: None,
        }
    }

    #[test]
    fn test_min_max_last_total() {
        let mut stats = RunStats::new();
        assert_eq!(stats.min_processed(), None);

        for units in [3, 0, 0, 0, 5] {
            stats.record_units(units);
        }

        assert_eq!(stats.rounds(), 5);
        assert_eq!(stats.min_processed(), Some(0));
        assert_eq!(stats.max_processed(), 5);
        assert_eq!(stats.last_processed(), 5);
        assert_eq!(stats.total_processed(), 8);
    }

    #[test]
    fn test_pacing_delta_is_signed() {
        let mut stats = RunStats::new();
        stats.record_pacing(TimeDelta::seconds(4));
        stats.record_pacing(TimeDelta::seconds(-6));
        assert_eq!(stats.pacing_delta(), TimeDelta::seconds(-2));
    }

    #[test]
    fn test_summary_averages() {
        let mut stats = RunStats::new();
        stats.record_units(4);
        stats.record_units(6);
        stats.record_pacing(TimeDelta::seconds(8));
        stats.record_pacing(TimeDelta::seconds(2));
        stats.record_sleep(1, Duration::from_secs(8));

        let summary = stats.summarize(timing(Duration::from_secs(12)), 2, 8);

        assert_eq!(summary.avg_units_per_round, 5.0);
        assert_eq!(summary.active, Duration::from_secs(4));
        assert_eq!(summary.secs_per_op, 0.5);
        assert_eq!(summary.avg_pacing_drift, TimeDelta::seconds(5));
        assert_eq!(summary.slept_rounds, vec![1]);
    }

    #[test]
    fn test_summary_without_operations() {
        let mut stats = RunStats::new();
        stats.record_units(0);
        let summary = stats.summarize(timing(Duration::from_millis(5)), 1, 0);
        assert_eq!(summary.secs_per_op, 0.0);
        assert_eq!(summary.min_processed, 0);
    }

    #[test]
    fn test_active_time_never_negative() {
        let mut stats = RunStats::new();
        stats.record_units(1);
        stats.record_sleep(1, Duration::from_secs(10));
        let summary = stats.summarize(timing(Duration::from_secs(1)), 1, 1);
        assert_eq!(summary.active, Duration::ZERO);
    }

    #[test]
    fn test_summary_rendering() {
        let mut stats = RunStats::new();
        stats.record_units(2);
        stats.record_pacing(TimeDelta::milliseconds(-1500));
        let mut t = timing(Duration::from_secs(3));
        t.short_circuited_at = Some(7);

        let text = stats.summarize(t, 1, 4).to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Simulated 2 agbots for 1 agreement checks");
        assert_eq!(lines[1], "Units processed: total=2, avg=2.000000/round, max=2, min=2, last=2");
        assert!(lines[2].starts_with("Start time: "));
        assert!(lines[2].ends_with("wall clock duration=3.000000 s"));
        assert_eq!(
            lines[3],
            "Overall: active time: 3.000000 s, num ops=4, avg=0.750000 s/op, avg iteration delta=-1.500000 s"
        );
        assert_eq!(lines[4], "Short-circuit: round 7");
    }

    #[test]
    fn test_notes_follow_unit_counts() {
        let mut stats = RunStats::new();
        stats.record_units(1);

        let text = stats
            .summarize(timing(Duration::from_secs(1)), 1, 1)
            .with_note("Max patterns=3")
            .to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], "Max patterns=3");
        assert_eq!(lines[5], "Short-circuit: never");
    }
}
