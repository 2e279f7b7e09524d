//! Scripted in-memory transport for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Method;

use crate::transport::client::{ApiRequest, HttpTransport, RawResponse, TransportError};

/// What the mock answers for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Respond { status: u16, body: Vec<u8> },
    Fail(String),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        MockReply::Respond {
            status,
            body: Vec::new(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        MockReply::Respond {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        MockReply::Respond {
            status,
            body: body.into().into_bytes(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail(message.into())
    }
}

#[derive(Debug)]
struct MockRoute {
    method: Method,
    path_suffix: String,
    reply: MockReply,
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<MockReply>,
    routes: Vec<MockRoute>,
    requests: Vec<ApiRequest>,
}

/// Transport that answers from a script and records every request.
///
/// Resolution order per attempt: the next queued reply, then the first route
/// whose method matches and whose path the URL ends with, then the verb's
/// success code with an empty body.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered attempt.
    pub fn push_reply(&self, reply: MockReply) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.push_back(reply);
        }
    }

    /// Queue `times` failures with the same message.
    pub fn fail_times(&self, times: usize, message: &str) {
        for _ in 0..times {
            self.push_reply(MockReply::fail(message));
        }
    }

    /// Answer every matching request with `reply`.
    pub fn route(&self, method: Method, path_suffix: impl Into<String>, reply: MockReply) {
        if let Ok(mut state) = self.state.lock() {
            state.routes.push(MockRoute {
                method,
                path_suffix: path_suffix.into(),
                reply,
            });
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().map(|s| s.requests.len()).unwrap_or(0)
    }

    /// Requests whose method matches and whose URL ends with `path_suffix`.
    pub fn requests_to(&self, method: Method, path_suffix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.ends_with(path_suffix))
            .collect()
    }
}

fn default_status(method: &Method) -> u16 {
    match *method {
        Method::GET => 200,
        Method::DELETE => 204,
        _ => 201,
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let reply = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| TransportError::new(format!("mock transport poisoned: {}", e)))?;
            state.requests.push(request.clone());

            match state.queue.pop_front() {
                Some(reply) => reply,
                None => state
                    .routes
                    .iter()
                    .find(|r| r.method == request.method && request.url.ends_with(&r.path_suffix))
                    .map(|r| r.reply.clone())
                    .unwrap_or_else(|| MockReply::status(default_status(&request.method))),
            }
        };

        match reply {
            MockReply::Respond { status, body } => Ok(RawResponse { status, body }),
            MockReply::Fail(message) => Err(TransportError::new(message)),
        }
    }
}
