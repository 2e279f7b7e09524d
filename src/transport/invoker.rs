//! Retrying invoker: one logical call, up to `max_retries + 1` physical attempts.

use std::sync::Arc;

use crate::error::{LoadsimError, Result};
use crate::sleeper::Sleeper;
use crate::transport::classifier::is_transient;
use crate::transport::client::{ApiRequest, HttpTransport, RawResponse};
use crate::transport::counter::OperationCounter;
use crate::transport::retry::RetryPolicy;

/// Issues a request, retrying transient failures and failing fast on the rest.
pub struct RetryingInvoker {
    transport: Arc<dyn HttpTransport>,
    counter: OperationCounter,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingInvoker {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        counter: OperationCounter,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            counter,
            policy,
            sleeper,
        }
    }

    /// Counter incremented on every physical attempt.
    pub fn counter(&self) -> &OperationCounter {
        &self.counter
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the request until it completes, fails fatally, or exhausts retries.
    ///
    /// Any completed response is returned regardless of status code.
    pub async fn invoke(&self, request: &ApiRequest) -> Result<RawResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.counter.increment();

            let err = match self.transport.send(request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !is_transient(&err.message) {
                return Err(LoadsimError::Transport {
                    method: request.method.to_string(),
                    url: request.url.clone(),
                    message: err.message,
                });
            }

            if !self.policy.should_retry(attempt) {
                return Err(LoadsimError::RetriesExhausted {
                    method: request.method.to_string(),
                    url: request.url.clone(),
                    attempts: attempt,
                    message: err.message,
                });
            }

            tracing::warn!(
                request = %request.describe(),
                attempt,
                backoff_ms = self.policy.backoff.as_millis() as u64,
                error = %err.message,
                "Transient transport error, will retry"
            );
            self.sleeper.sleep(self.policy.backoff).await;
        }
    }
}
