//! Responses from the exchange and body decoding.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

use crate::error::{LoadsimError, Result};

/// Response body in the form the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body, body discarded, or a DELETE
    Empty,
    Raw(Vec<u8>),
    Canonical(String),
    Document(Value),
}

/// Outcome of a logical call that was allowed to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
    /// "METHOD url" of the call, for error messages
    pub context: String,
}

impl ApiResponse {
    /// Decode the body into `T`. `None` when there was no body.
    ///
    /// A malformed body is always an error, whatever the status code.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let decoded = match &self.body {
            ResponseBody::Empty => return Ok(None),
            ResponseBody::Raw(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Canonical(text) => serde_json::from_str(text),
            ResponseBody::Document(value) => serde_json::from_value(value.clone()),
        };
        decoded.map(Some).map_err(|e| decode_error(&self.context, e))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, ResponseBody::Empty)
    }
}

pub(crate) fn decode_error(context: &str, err: impl std::fmt::Display) -> LoadsimError {
    LoadsimError::Decode {
        context: context.to_string(),
        message: err.to_string(),
    }
}

/// Parse a JSON body, failing on malformed payloads.
pub(crate) fn parse_document(context: &str, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| decode_error(context, e))
}

/// Re-encode a JSON body as 4-space indented text with sorted keys.
pub(crate) fn canonicalize(context: &str, bytes: &[u8]) -> Result<String> {
    let value = parse_document(context, bytes)?;
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer).map_err(|e| decode_error(context, e))?;
    String::from_utf8(out).map_err(|e| decode_error(context, e))
}
