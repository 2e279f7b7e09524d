//! Exchange API client - status-code contract over the retrying invoker
//!
//! Each call names the codes it accepts beyond the verb default (200 GET,
//! 201 PUT/POST/PATCH, 204 DELETE). Unacceptable codes on reads and deletes
//! are reported and the run continues; on mutating calls they abort the run
//! unless the call is marked `continue_on_error`.

pub mod call;
pub mod response;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::{LoadsimError, Result};
use crate::report::Reporter;
use crate::transport::{ApiRequest, OperationCounter, RetryingInvoker};

pub use call::{ApiCall, ResponseMode};
pub use response::{ApiResponse, ResponseBody};

/// Client for one exchange endpoint.
pub struct ExchangeClient {
    base_url: String,
    invoker: RetryingInvoker,
    reporter: Arc<dyn Reporter>,
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>, invoker: RetryingInvoker, reporter: Arc<dyn Reporter>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            invoker,
            reporter,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Physical attempts made through this client.
    pub fn counter(&self) -> &OperationCounter {
        self.invoker.counter()
    }

    pub fn operation_count(&self) -> u64 {
        self.invoker.counter().get()
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build_request(&self, call: &ApiCall) -> ApiRequest {
        let mut request = ApiRequest::new(call.method.clone(), self.url(&call.path));

        if call.method != Method::DELETE {
            request = request.with_header("Accept", "application/json");
        }
        if call.is_mutating() {
            request = request.with_header("Content-Type", "application/json");
        }
        if let Some(credentials) = &call.credentials {
            request = request.with_header("Authorization", format!("Basic {}", STANDARD.encode(credentials)));
        }
        if let Some(body) = &call.body {
            request = request.with_body(body.clone());
        }

        request
    }

    /// Run one logical call under its status-code contract.
    pub async fn call(&self, call: ApiCall) -> Result<ApiResponse> {
        let request = self.build_request(&call);
        let context = request.describe();
        log::debug!("{}", context);

        let raw = self.invoker.invoke(&request).await?;
        log::debug!("HTTP code: {}", raw.status);

        if !call.is_acceptable(raw.status) {
            let body_text = String::from_utf8_lossy(&raw.body).into_owned();
            if call.bad_status_is_fatal() {
                return Err(LoadsimError::BadStatus {
                    method: call.method.to_string(),
                    url: request.url.clone(),
                    status: raw.status,
                    body: body_text,
                });
            }
            let message = if call.method == Method::DELETE {
                format!("bad HTTP code {} from {}", raw.status, context)
            } else {
                format!("bad HTTP code {} from {}, output: {}", raw.status, context, body_text)
            };
            self.reporter.error(&message);
        }

        // Some exchange front-ends answer auth problems with an empty body.
        let body = if call.method == Method::DELETE || raw.body.is_empty() {
            ResponseBody::Empty
        } else {
            match call.response {
                ResponseMode::Discard => ResponseBody::Empty,
                ResponseMode::Raw => ResponseBody::Raw(raw.body),
                ResponseMode::Canonical => ResponseBody::Canonical(response::canonicalize(&context, &raw.body)?),
                ResponseMode::Document => ResponseBody::Document(response::parse_document(&context, &raw.body)?),
            }
        };

        Ok(ApiResponse {
            status: raw.status,
            body,
            context,
        })
    }

    /// Run a call and decode its body into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, call: ApiCall) -> Result<(u16, Option<T>)> {
        let response = self.call(call.response(ResponseMode::Document)).await?;
        let decoded = response.decode()?;
        Ok((response.status, decoded))
    }
}
