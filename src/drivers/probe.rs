//! Quick latency probe: the same node GET, back to back.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::ProbeConfig;
use crate::drivers::{Harness, add_org};
use crate::error::{LoadsimError, Result};
use crate::exchange::{ApiCall, ResponseMode};

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSummary {
    pub elapsed: Duration,
    pub operations: u32,
    pub secs_per_op: f64,
}

impl fmt::Display for ProbeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total time: {:.6} s, num ops={}, avg={:.6} s/op",
            self.elapsed.as_secs_f64(),
            self.operations,
            self.secs_per_op
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProbeDriver {
    config: ProbeConfig,
    times: u32,
}

impl ProbeDriver {
    pub fn new(config: ProbeConfig, times: u32) -> Result<Self> {
        if times == 0 {
            return Err(LoadsimError::Config("num-times must be greater than 0".to_string()));
        }
        if config.node_auth.is_empty() {
            return Err(LoadsimError::Config(
                "environment variable HZN_EXCHANGE_NODE_AUTH is required".to_string(),
            ));
        }
        Ok(Self { config, times })
    }

    fn credentials(&self) -> Result<String> {
        let org = self.config.default_org.as_deref().unwrap_or(&self.config.org);
        add_org(&self.config.node_auth, org)
    }

    /// Issue the GETs sequentially and time them as a whole.
    pub async fn run(&self, harness: &Harness) -> Result<ProbeSummary> {
        let auth = self.credentials()?;
        let path = format!("orgs/{}/nodes/{}", self.config.org, self.config.node_id);
        log::info!("Starting probe of {} ({} times)", path, self.times);

        let start = Instant::now();
        for i in 1..=self.times {
            let response = harness
                .client
                .call(ApiCall::get(path.as_str()).auth(auth.as_str()).accept(&[200]).response(ResponseMode::Raw))
                .await?;
            log::debug!("probe {} of {}: httpCode={}", i, self.times, response.status);
        }
        let elapsed = start.elapsed();

        let summary = ProbeSummary {
            elapsed,
            operations: self.times,
            secs_per_op: elapsed.as_secs_f64() / f64::from(self.times),
        };
        harness.reporter().summary(&summary.to_string())?;
        Ok(summary)
    }
}
