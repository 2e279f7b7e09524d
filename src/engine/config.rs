//! Immutable per-run parameters for the cadence loop.

use std::time::Duration;

use crate::error::{LoadsimError, Result};

/// Default first round at which the short-circuit may latch
pub const DEFAULT_SHORT_CIRCUIT_CHECK_ROUND: u32 = 10;

/// Default run of consecutive empty rounds needed to latch
pub const DEFAULT_REQUIRED_EMPTY_ROUNDS: u32 = 3;

/// Parameters fixed for the lifetime of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    total_rounds: u32,
    nominal_interval_secs: u64,
    no_sleep: bool,
    short_circuit_check_round: u32,
    required_empty_rounds: u32,
}

impl RunConfig {
    /// A run of `total_rounds` rounds paced `nominal_interval_secs` apart.
    pub fn new(total_rounds: u32, nominal_interval_secs: u64) -> Result<Self> {
        if total_rounds == 0 {
            return Err(LoadsimError::Config("total rounds must be greater than 0".to_string()));
        }
        if nominal_interval_secs == 0 {
            return Err(LoadsimError::Config(
                "nominal interval must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(Self {
            total_rounds,
            nominal_interval_secs,
            no_sleep: false,
            short_circuit_check_round: DEFAULT_SHORT_CIRCUIT_CHECK_ROUND,
            required_empty_rounds: DEFAULT_REQUIRED_EMPTY_ROUNDS,
        })
    }

    /// Disable the pacing sleep entirely.
    pub fn with_no_sleep(mut self, no_sleep: bool) -> Self {
        self.no_sleep = no_sleep;
        self
    }

    /// Latch the short-circuit once `required_empty_rounds` consecutive empty
    /// rounds have been seen, no earlier than round `check_round`.
    pub fn with_short_circuit(mut self, check_round: u32, required_empty_rounds: u32) -> Result<Self> {
        if check_round == 0 {
            return Err(LoadsimError::Config("short-circuit check round must be at least 1".to_string()));
        }
        if required_empty_rounds == 0 {
            return Err(LoadsimError::Config(
                "required empty rounds must be at least 1".to_string(),
            ));
        }
        self.short_circuit_check_round = check_round;
        self.required_empty_rounds = required_empty_rounds;
        Ok(self)
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn nominal_interval_secs(&self) -> u64 {
        self.nominal_interval_secs
    }

    pub fn nominal_interval(&self) -> Duration {
        Duration::from_secs(self.nominal_interval_secs)
    }

    pub fn no_sleep(&self) -> bool {
        self.no_sleep
    }

    pub fn short_circuit_check_round(&self) -> u32 {
        self.short_circuit_check_round
    }

    pub fn required_empty_rounds(&self) -> u32 {
        self.required_empty_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new(90, 10).unwrap();
        assert_eq!(config.total_rounds(), 90);
        assert_eq!(config.nominal_interval(), Duration::from_secs(10));
        assert!(!config.no_sleep());
        assert_eq!(config.short_circuit_check_round(), 10);
        assert_eq!(config.required_empty_rounds(), 3);
    }

    #[test]
    fn test_zero_rounds_rejected() {
        assert!(matches!(RunConfig::new(0, 10), Err(LoadsimError::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(RunConfig::new(5, 0), Err(LoadsimError::Config(_))));
    }

    #[test]
    fn test_short_circuit_bounds() {
        let config = RunConfig::new(5, 10).unwrap();
        assert!(config.clone().with_short_circuit(0, 2).is_err());
        assert!(config.clone().with_short_circuit(2, 0).is_err());

        let config = config.with_short_circuit(2, 2).unwrap().with_no_sleep(true);
        assert_eq!(config.short_circuit_check_round(), 2);
        assert_eq!(config.required_empty_rounds(), 2);
        assert!(config.no_sleep());
    }
}
