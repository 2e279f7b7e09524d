//! Short-circuit detection: stop pacing once rounds keep coming back empty.
//!
//! The latch is one-way. It never ends the run; it only removes the pacing
//! sleep for the rounds that remain.

/// Tracks the empty-round streak and the one-way short-circuit latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCircuitDetector {
    check_round: u32,
    required_empty: u32,
    consecutive_empty: u32,
    latched_at: Option<u32>,
}

impl ShortCircuitDetector {
    pub fn new(check_round: u32, required_empty: u32) -> Self {
        Self {
            check_round,
            required_empty,
            consecutive_empty: 0,
            latched_at: None,
        }
    }

    /// Feed round `round`'s emptiness. Returns true on the round the latch closes.
    pub fn observe(&mut self, round: u32, empty: bool) -> bool {
        if empty {
            self.consecutive_empty = self.consecutive_empty.saturating_add(1);
        } else {
            self.consecutive_empty = 0;
        }

        if self.latched_at.is_none() && round >= self.check_round && self.consecutive_empty >= self.required_empty {
            self.latched_at = Some(round);
            return true;
        }
        false
    }

    pub fn is_short_circuited(&self) -> bool {
        self.latched_at.is_some()
    }

    /// Round on which the latch closed.
    pub fn latched_at(&self) -> Option<u32> {
        self.latched_at
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }
}
