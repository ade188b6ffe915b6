//! Probe module for endpoint health checks.
//!
//! A probe never fails: every outcome, including transport errors, is
//! normalized into a [`ProbeResult`].

mod http;

pub use http::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::TargetConfig;
use crate::db::ProbeResult;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {code}: {reason}")]
    Status { code: u16, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProbeError {
    /// The HTTP status that caused the failure, if a response arrived.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Anything that can check a target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &TargetConfig) -> ProbeResult;
}

/// Whether an HTTP status counts as up. Redirects count.
pub fn is_up_status(code: u16) -> bool {
    (200..400).contains(&code)
}
