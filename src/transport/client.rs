//! HTTP transport seam and its reqwest implementation.
//!
//! A transport performs exactly one physical attempt per `send`; retries,
//! counting and status policy live above it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Method};
use serde::{Deserialize, Serialize};

use crate::error::{LoadsimError, Result};
use crate::transport::classifier::error_chain_text;

/// One fully formed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header with this name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// "METHOD url", used in log and error messages.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Status code and fully read body of a completed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A failed physical attempt, carried as text for classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(error_chain_text(&err))
    }
}

/// Performs one physical HTTP attempt.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, TransportError>;
}

/// HTTP client construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Whole-request timeout, body included
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub keepalive_ms: u64,
    pub max_idle_connections: usize,
    pub idle_timeout_ms: u64,
    /// Extra PEM trust anchor added to the default roots
    pub ca_bundle: Option<PathBuf>,
    /// Accept any server certificate; test environments only
    pub skip_tls_verify: bool,
    /// Share one client across all calls in a run
    pub reuse_client: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 20_000,
            keepalive_ms: 60_000,
            max_idle_connections: 20,
            idle_timeout_ms: 120_000,
            ca_bundle: None,
            skip_tls_verify: false,
            reuse_client: true,
        }
    }
}

/// Transport backed by reqwest.
pub struct ReqwestTransport {
    settings: ClientSettings,
    ca_certificates: Vec<Certificate>,
    shared: Option<Client>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("settings", &self.settings)
            .field("ca_certificates", &self.ca_certificates.len())
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

impl ReqwestTransport {
    /// Build the transport, reading every trust anchor in the bundle once up front.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let ca_certificates = match &settings.ca_bundle {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    LoadsimError::Config(format!("failed to read CA bundle {}: {}", path.display(), e))
                })?;
                let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                    LoadsimError::Config(format!("invalid CA bundle {}: {}", path.display(), e))
                })?;
                if certs.is_empty() {
                    return Err(LoadsimError::Config(format!(
                        "CA bundle {} contains no certificates",
                        path.display()
                    )));
                }
                log::debug!("Trusting {} certificates from {}", certs.len(), path.display());
                certs
            }
            None => Vec::new(),
        };

        let mut transport = Self {
            settings,
            ca_certificates,
            shared: None,
        };

        if transport.settings.reuse_client {
            let client = transport
                .build_client()
                .map_err(|e| LoadsimError::Config(format!("failed to create HTTP client: {}", e)))?;
            transport.shared = Some(client);
        }

        if transport.settings.skip_tls_verify {
            log::warn!("TLS certificate verification is disabled");
        }

        Ok(transport)
    }

    fn build_client(&self) -> std::result::Result<Client, reqwest::Error> {
        let s = &self.settings;
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(s.timeout_ms))
            .connect_timeout(Duration::from_millis(s.connect_timeout_ms))
            .tcp_keepalive(Duration::from_millis(s.keepalive_ms))
            .pool_max_idle_per_host(s.max_idle_connections)
            .pool_idle_timeout(Duration::from_millis(s.idle_timeout_ms))
            .danger_accept_invalid_certs(s.skip_tls_verify);

        for cert in &self.ca_certificates {
            builder = builder.add_root_certificate(cert.clone());
        }

        builder.build()
    }

    fn client(&self) -> std::result::Result<Client, TransportError> {
        match &self.shared {
            Some(client) => Ok(client.clone()),
            None => self.build_client().map_err(TransportError::from),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, TransportError> {
        let client = self.client()?;

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}
