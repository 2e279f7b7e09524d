//! Domain drivers - the agbot, node and probe simulations
//!
//! Each driver sets up exchange resources, runs its round body under the
//! cadence loop and cleans up afterwards. Drivers only use the public engine,
//! exchange and transport APIs.

pub mod agbot;
pub mod node;
pub mod probe;

use std::sync::Arc;

use crate::config::Config;
use crate::error::{LoadsimError, Result};
use crate::exchange::ExchangeClient;
use crate::report::Reporter;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::transport::{HttpTransport, OperationCounter, ReqwestTransport, RetryPolicy, RetryingInvoker};

pub use agbot::AgbotDriver;
pub use node::NodeDriver;
pub use probe::{ProbeDriver, ProbeSummary};

/// Service every pattern in the simulation points at
pub const SERVICE_URL: &str = "nodeagbotsvc";
pub const SERVICE_VERSION: &str = "1.2.3";
pub const SERVICE_ARCH: &str = "amd64";

pub fn service_id() -> String {
    format!("{}_{}_{}", SERVICE_URL, SERVICE_VERSION, SERVICE_ARCH)
}

/// Strip a leading `org/` from an exchange id.
pub fn trim_org(id: &str) -> Result<&str> {
    let mut parts = id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (_, None, _) => Ok(id),
        (_, Some(rest), None) => Ok(rest),
        _ => Err(LoadsimError::Config(format!(
            "can not remove org from id '{}' because it contains more than 1 '/'",
            id
        ))),
    }
}

/// Prefix `id` with `org/` unless it already carries an org.
pub fn add_org(id: &str, org: &str) -> Result<String> {
    match id.matches('/').count() {
        0 => Ok(format!("{}/{}", org, id)),
        1 => Ok(id.to_string()),
        _ => Err(LoadsimError::Config(format!("the id '{}' can not contain more than 1 '/'", id))),
    }
}

/// Everything a driver needs to talk to the exchange and pace itself.
pub struct Harness {
    pub client: ExchangeClient,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Harness {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let invoker = RetryingInvoker::new(transport, OperationCounter::new(), policy, sleeper.clone());
        Self {
            client: ExchangeClient::new(base_url, invoker, reporter),
            sleeper,
        }
    }

    /// Real reqwest transport and tokio sleeps, built from configuration.
    pub fn from_config(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        config.exchange.require_url()?;
        let transport = ReqwestTransport::new(config.http.clone())?;
        Ok(Self::new(
            config.exchange.url.clone(),
            Arc::new(transport),
            config.retry.policy(),
            Arc::new(TokioSleeper),
            reporter,
        ))
    }

    pub fn counter(&self) -> &OperationCounter {
        self.client.counter()
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        self.client.reporter()
    }
}
