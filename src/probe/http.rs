//! HTTP probe implementation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};

use super::{is_up_status, Probe, ProbeError};
use crate::config::TargetConfig;
use crate::db::ProbeResult;

/// User agent sent with every probe.
pub const USER_AGENT: &str = concat!("uptrail/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 10;

/// HTTP(S) prober sharing one connection pool across all targets.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober. With `follow_redirects` off, 3xx codes are terminal.
    ///
    /// A chain longer than `MAX_REDIRECTS` stops at the last 3xx response
    /// instead of failing, so it still counts as up.
    pub fn new(follow_redirects: bool) -> Result<Self, ProbeError> {
        let policy = if follow_redirects {
            Policy::custom(|attempt| {
                if attempt.previous().len() > MAX_REDIRECTS {
                    attempt.stop()
                } else {
                    attempt.follow()
                }
            })
        } else {
            Policy::none()
        };

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(policy)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    /// Issue one GET and return the status code if it counts as up.
    ///
    /// `Ok(None)` is a redirect the transport gave up on without a response.
    async fn check(&self, url: &str, timeout: Duration) -> Result<Option<u16>, ProbeError> {
        // Latency is time to response headers; the body is not read.
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            // Redirects count as up however the client surfaces them
            Err(e) if e.is_redirect() => {
                tracing::debug!("Probe {}: redirect not followed: {}", url, e);
                return Ok(e.status().map(|s| s.as_u16()));
            }
            Err(e) => return Err(classify_error(&e, timeout)),
        };

        let status = response.status();
        let code = status.as_u16();
        if is_up_status(code) {
            Ok(Some(code))
        } else {
            Err(ProbeError::Status {
                code,
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            })
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, target: &TargetConfig) -> ProbeResult {
        let checked_at = Utc::now();
        let start = Instant::now();

        let outcome = self.check(&target.url, target.timeout()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Some(code)) => {
                tracing::debug!("Probe {} up: HTTP {} in {}ms", target.name, code, elapsed_ms);
                ProbeResult::up(&target.name, &target.url, code, elapsed_ms, checked_at)
            }
            Ok(None) => ProbeResult {
                status_code: None,
                ..ProbeResult::up(&target.name, &target.url, 0, elapsed_ms, checked_at)
            },
            Err(e) => {
                tracing::debug!("Probe {} down after {}ms: {}", target.name, elapsed_ms, e);
                ProbeResult::down(
                    &target.name,
                    &target.url,
                    e.status_code(),
                    e.to_string(),
                    elapsed_ms,
                    checked_at,
                )
            }
        }
    }
}

fn classify_error(err: &reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    let detail = error_chain(err);
    if err.is_connect() {
        ProbeError::Connect(detail)
    } else if err.is_builder() {
        ProbeError::Config(detail)
    } else {
        ProbeError::Network(detail)
    }
}

/// Flatten an error and its sources; reqwest's top-level message alone hides the cause.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
