//! Probe module for target health checks.
//!
//! Only HTTP probes are supported: a target is up when `GET <url>` answers
//! `200 OK` before the client timeout.

mod http;

pub use http::*;

use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("Status {0}")]
    Status(u16),
    #[error("invalid configuration: {0}")]
    Config(String),
}
