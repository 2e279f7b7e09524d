//! Error types for loadsim
//!
//! Centralized error handling using thiserror. Every fatal condition in a run
//! surfaces as one of these variants; only `main` turns them into an exit code.

use thiserror::Error;

/// Exit code for bad CLI input or configuration
pub const EXIT_INPUT: i32 = 1;
/// Exit code for request body encoding failures
pub const EXIT_JSON: i32 = 3;
/// Exit code for report file I/O failures
pub const EXIT_FILE_IO: i32 = 4;
/// Exit code for HTTP transport, status and response decode failures
pub const EXIT_HTTP: i32 = 5;

/// All error types that can abort a simulation run
#[derive(Debug, Error)]
pub enum LoadsimError {
    /// Non-transient transport failure, never retried
    #[error("error calling {method} {url}: {message}")]
    Transport { method: String, url: String, message: String },

    /// Transient transport failure that outlived the retry bound
    #[error("error calling {method} {url}: {message}. At retry max ({attempts} attempts), exiting.")]
    RetriesExhausted {
        method: String,
        url: String,
        attempts: u32,
        message: String,
    },

    /// Unacceptable status code on a call that is not allowed to continue
    #[error("bad HTTP code {status} from {method} {url}, output: {body}")]
    BadStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Response body could not be decoded where a decode was required
    #[error("failed to decode response body from {context}: {message}")]
    Decode { context: String, message: String },

    /// Invalid configuration or input
    #[error("Config error: {0}")]
    Config(String),

    /// Report artifact could not be written
    #[error("Report error: {0}")]
    Report(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadsimError {
    /// Process exit code the top-level driver uses for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadsimError::Transport { .. }
            | LoadsimError::RetriesExhausted { .. }
            | LoadsimError::BadStatus { .. }
            | LoadsimError::Decode { .. } => EXIT_HTTP,
            LoadsimError::Json(_) => EXIT_JSON,
            LoadsimError::Report(_) | LoadsimError::Io(_) => EXIT_FILE_IO,
            LoadsimError::Config(_) => EXIT_INPUT,
        }
    }
}

/// Result type alias for loadsim operations
pub type Result<T> = std::result::Result<T, LoadsimError>;
