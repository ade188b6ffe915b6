//! JSON payloads posted to webhook receivers.
//!
//! Field names are part of the receiver contract and must not change.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::TargetConfig;
use crate::db::ProbeResult;

/// Alert event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    UrlDown,
    UrlUp,
    LatencyHigh,
    LatencyNormal,
    Test,
}

impl AlertEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlDown => "url_down",
            Self::UrlUp => "url_up",
            Self::LatencyHigh => "latency_high",
            Self::LatencyNormal => "latency_normal",
            Self::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub code: Option<u16>,
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub timestamp: String,
}

/// Payload for up/down transitions.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub event: AlertEvent,
    pub url: UrlInfo,
    pub status: StatusInfo,
    pub previous_status: Option<&'static str>,
}

impl StatusPayload {
    pub fn from_result(event: AlertEvent, result: &ProbeResult, previous_up: Option<bool>) -> Self {
        Self {
            event,
            url: UrlInfo {
                name: result.target_name.clone(),
                url: result.target_url.clone(),
            },
            status: StatusInfo {
                code: result.status_code,
                success: result.is_up,
                response_time_ms: result.response_time_ms,
                error: result.error_message.clone(),
                timestamp: format_timestamp(result.checked_at),
            },
            previous_status: previous_up.map(status_label),
        }
    }

    /// Synthetic payload used to verify channel configuration.
    pub fn test() -> Self {
        let result = ProbeResult::up("test", "https://example.com", 200, 0, Utc::now());
        Self::from_result(AlertEvent::Test, &result, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyInfo {
    pub current_ms: u64,
    pub threshold_ms: u64,
    pub consecutive_checks: u32,
}

/// Payload for latency tripwire transitions.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyPayload {
    pub event: AlertEvent,
    pub url: UrlInfo,
    pub latency: LatencyInfo,
    pub timestamp: String,
}

impl LatencyPayload {
    pub fn new(
        event: AlertEvent,
        target: &TargetConfig,
        current_ms: u64,
        threshold_ms: u64,
        consecutive_checks: u32,
    ) -> Self {
        Self {
            event,
            url: UrlInfo {
                name: target.name.clone(),
                url: target.url.clone(),
            },
            latency: LatencyInfo {
                current_ms,
                threshold_ms,
                consecutive_checks,
            },
            timestamp: format_timestamp(Utc::now()),
        }
    }
}

/// Either payload shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AlertPayload {
    Status(StatusPayload),
    Latency(LatencyPayload),
}

impl AlertPayload {
    pub fn event(&self) -> AlertEvent {
        match self {
            Self::Status(p) => p.event,
            Self::Latency(p) => p.event,
        }
    }
}

pub fn status_label(is_up: bool) -> &'static str {
    if is_up {
        "up"
    } else {
        "down"
    }
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_payload_shape() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let error = "connection failed: refused";
        let result = ProbeResult::down("api", "https://api.example.com", None, error, 42, at);
        let status = StatusPayload::from_result(AlertEvent::UrlDown, &result, Some(true));
        let payload = AlertPayload::Status(status);

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "event": "url_down",
                "url": {"name": "api", "url": "https://api.example.com"},
                "status": {
                    "code": null,
                    "success": false,
                    "response_time_ms": 42,
                    "error": "connection failed: refused",
                    "timestamp": "2024-05-01T12:00:00.000Z"
                },
                "previous_status": "up"
            })
        );
    }

    #[test]
    fn test_latency_payload_shape() {
        let target = TargetConfig::new("api", "https://api.example.com");
        let latency = LatencyPayload::new(AlertEvent::LatencyHigh, &target, 650, 500, 3);
        let payload = AlertPayload::Latency(latency);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["event"], "latency_high");
        assert_eq!(value["url"], json!({"name": "api", "url": "https://api.example.com"}));
        assert_eq!(
            value["latency"],
            json!({"current_ms": 650, "threshold_ms": 500, "consecutive_checks": 3})
        );
        assert!(value["timestamp"].is_string());
        assert_eq!(payload.event(), AlertEvent::LatencyHigh);
    }

    #[test]
    fn test_event_names_match_serde() {
        for event in [
            AlertEvent::UrlDown,
            AlertEvent::UrlUp,
            AlertEvent::LatencyHigh,
            AlertEvent::LatencyNormal,
            AlertEvent::Test,
        ] {
            assert_eq!(serde_json::to_value(event).unwrap(), event.as_str());
        }
    }
}
