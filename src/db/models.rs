//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The outcome of one probe against one target.
///
/// `error_message` is `None` exactly when `is_up` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub target_name: String,
    pub target_url: String,
    /// Absent when the transport itself failed.
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub is_up: bool,
    pub error_message: Option<String>,
    /// Start of the measurement.
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    /// A successful probe.
    pub fn up(
        name: &str,
        url: &str,
        status_code: u16,
        response_time_ms: u64,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_name: name.to_string(),
            target_url: url.to_string(),
            status_code: Some(status_code),
            response_time_ms,
            is_up: true,
            error_message: None,
            checked_at,
        }
    }

    /// A failed probe.
    pub fn down(
        name: &str,
        url: &str,
        status_code: Option<u16>,
        error: impl Into<String>,
        response_time_ms: u64,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_name: name.to_string(),
            target_url: url.to_string(),
            status_code,
            response_time_ms,
            is_up: false,
            error_message: Some(error.into()),
            checked_at,
        }
    }
}

/// Latest status of a target plus its rolling 24h statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    /// Most recent probe for the target.
    pub latest: ProbeResult,
    pub checks_24h: u64,
    /// Percentage of up checks in the window; `None` without checks.
    pub uptime_24h: Option<f64>,
    pub avg_response_time_ms_24h: Option<f64>,
}

/// Storage statistics for startup diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub row_count: i64,
    pub size_bytes: i64,
}
