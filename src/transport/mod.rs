//! Transport layer - one logical HTTP call with bounded retries
//!
//! This module provides:
//! - Transient error classification over error text
//! - The per-run physical attempt counter
//! - The retry policy and the retrying invoker
//! - The `HttpTransport` seam with reqwest and mock implementations

pub mod classifier;
pub mod client;
pub mod counter;
pub mod invoker;
pub mod mock;
pub mod retry;

pub use classifier::{error_chain_text, is_transient};
pub use client::{ApiRequest, ClientSettings, HttpTransport, RawResponse, ReqwestTransport, TransportError};
pub use counter::OperationCounter;
pub use invoker::RetryingInvoker;
pub use mock::{MockReply, MockTransport};
pub use retry::RetryPolicy;
