//! Loadsim - interval-paced load simulation for exchange-style REST APIs
//!
//! Simulated actors (agbots, nodes) issue their periodic exchange calls in
//! rounds paced to a target interval. Every call goes through a bounded
//! retrying invoker that counts physical attempts, and each run ends with a
//! summary of throughput and pacing drift.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod report;
pub mod sleeper;
pub mod transport;

pub use error::{LoadsimError, Result};
