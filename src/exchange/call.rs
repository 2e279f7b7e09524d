//! Description of one logical exchange API call.

use reqwest::Method;
use serde::Serialize;

use crate::error::Result;

/// How the caller wants the response body handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Body is read but not returned
    #[default]
    Discard,
    /// Bytes exactly as received
    Raw,
    /// Decoded and re-encoded as indented JSON text
    Canonical,
    /// Decoded JSON document, for typed access via `ApiResponse::decode`
    Document,
}

/// One logical call: verb, target, credentials and status-code contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub method: Method,
    /// Path relative to the exchange base URL, without a leading slash
    pub path: String,
    /// Opaque `user:secret` string sent as Basic auth
    pub credentials: Option<String>,
    /// Codes accepted in addition to the verb's default
    pub accept: Vec<u16>,
    pub body: Option<Vec<u8>>,
    /// For mutating verbs: log and continue on an unacceptable code
    pub continue_on_error: bool,
    pub response: ResponseMode,
}

impl ApiCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            credentials: None,
            accept: Vec::new(),
            body: None,
            continue_on_error: false,
            response: ResponseMode::Discard,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn auth(mut self, credentials: impl Into<String>) -> Self {
        let credentials = credentials.into();
        self.credentials = if credentials.is_empty() { None } else { Some(credentials) };
        self
    }

    pub fn accept(mut self, codes: &[u16]) -> Self {
        self.accept.extend_from_slice(codes);
        self
    }

    /// Serialize `body` as the JSON request payload.
    pub fn json_body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    /// Use `body` verbatim as the JSON request payload.
    pub fn raw_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into().into_bytes());
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn response(mut self, mode: ResponseMode) -> Self {
        self.response = mode;
        self
    }

    /// PUT, POST or PATCH.
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::DELETE)
    }

    /// Code accepted for this verb without being listed.
    pub fn default_code(&self) -> u16 {
        match self.method {
            Method::GET => 200,
            Method::DELETE => 204,
            _ => 201,
        }
    }

    pub fn is_acceptable(&self, status: u16) -> bool {
        status == self.default_code() || self.accept.contains(&status)
    }

    /// Whether an unacceptable code aborts the run.
    ///
    /// Reads and deletes never abort; mutating calls abort unless marked
    /// `continue_on_error`.
    pub fn bad_status_is_fatal(&self) -> bool {
        self.is_mutating() && !self.continue_on_error
    }
}
