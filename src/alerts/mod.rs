//! Alert engine: state tracking and delivery of up/down and latency alerts.
//!
//! Decisions are made synchronously under a single mutex so results for the
//! same target are handled in order. Delivery runs outside the lock and is
//! returned to the caller as [`Dispatch`] values, so a slow receiver never
//! blocks other targets.

mod email;
mod payload;
mod retry;
mod state;
mod webhook;

pub use email::*;
pub use payload::*;
pub use retry::*;
pub use state::*;
pub use webhook::*;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::config::{AlertsConfig, TargetConfig};
use crate::db::ProbeResult;
use crate::guard::{GuardError, UrlGuard};

/// Alert delivery error types.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("URL rejected: {0}")]
    Guard(#[from] GuardError),
    #[error("receiver returned HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("email error: {0}")]
    Email(String),
    #[error("failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("failed to render email: {0}")]
    Template(#[from] askama::Error),
    #[error("invalid alert configuration: {0}")]
    Config(String),
}

/// Identifies a delivery channel for cooldown bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Webhook(String),
    Email,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook(url) => write!(f, "webhook:{}", url),
            Self::Email => write!(f, "email"),
        }
    }
}

/// One pending delivery produced by a decision.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub target: String,
    pub channel: ChannelId,
    pub payload: AlertPayload,
    /// State-change alerts stamp the channel's cooldown on success.
    pub stamps_cooldown: bool,
}

/// Decides when to alert and delivers alerts.
pub struct AlertEngine {
    webhooks: Vec<WebhookChannel>,
    email: Option<EmailChannel>,
    guard: UrlGuard,
    retry: RetryPolicy,
    states: Mutex<HashMap<String, TargetState>>,
}

impl AlertEngine {
    /// Build the engine from configuration. Must run inside a tokio runtime.
    pub fn new(config: &AlertsConfig) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::probe::USER_AGENT)
            .build()
            .map_err(|e| AlertError::Config(e.to_string()))?;

        // Cooldown clocks are keyed by URL
        let mut seen = HashSet::new();
        if let Some(dup) = config.webhooks.iter().find(|h| !seen.insert(h.url.as_str())) {
            return Err(AlertError::Config(format!("duplicate webhook url {}", dup.url)));
        }

        let webhooks = config
            .webhooks
            .iter()
            .cloned()
            .map(|hook| WebhookChannel::new(hook, client.clone()))
            .collect();

        let email = match &config.smtp {
            Some(smtp) => Some(EmailChannel::new(smtp.clone())?),
            None => None,
        };

        Ok(Self {
            webhooks,
            email,
            guard: UrlGuard::new(config.allow_private_webhooks),
            retry: RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            states: Mutex::new(HashMap::new()),
        })
    }

    /// An engine with no channels; decisions are tracked but nothing is sent.
    pub fn silent() -> Self {
        Self {
            webhooks: Vec::new(),
            email: None,
            guard: UrlGuard::default(),
            retry: RetryPolicy::default(),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, TargetState>> {
        // State is plain data; a panic elsewhere cannot leave it half-updated.
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a probe result and return the alerts it triggers.
    pub fn evaluate(&self, result: &ProbeResult) -> Vec<Dispatch> {
        let now = Utc::now();
        let mut states = self.lock_states();
        let state = states.entry(result.target_name.clone()).or_default();

        let previous = state.last_is_up.replace(result.is_up);
        let previous = match previous {
            None => {
                tracing::debug!(
                    "Alerts: first observation for {} ({}), not alerting",
                    result.target_name,
                    status_label(result.is_up)
                );
                return Vec::new();
            }
            Some(previous) if previous == result.is_up => return Vec::new(),
            Some(previous) => previous,
        };

        let event = if result.is_up {
            tracing::info!("Alerts: {} recovered", result.target_name);
            AlertEvent::UrlUp
        } else {
            tracing::warn!(
                "Alerts: {} went down: {}",
                result.target_name,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
            AlertEvent::UrlDown
        };

        let status = StatusPayload::from_result(event, result, Some(previous));
        let payload = AlertPayload::Status(status);
        let mut dispatches = Vec::new();

        for hook in &self.webhooks {
            let config = hook.config();
            if !config.enabled || !hook.subscribed(event) {
                continue;
            }
            let channel = ChannelId::Webhook(config.url.clone());
            if !state.cooldown_elapsed(&channel, config.cooldown_seconds, now) {
                tracing::debug!("Alerts: {} in cooldown for {}", channel, result.target_name);
                continue;
            }
            dispatches.push(Dispatch {
                target: result.target_name.clone(),
                channel,
                payload: payload.clone(),
                stamps_cooldown: true,
            });
        }

        if let Some(email) = &self.email {
            let config = email.config();
            if config.enabled && email.subscribed(event) {
                if state.cooldown_elapsed(&ChannelId::Email, config.cooldown_seconds, now) {
                    dispatches.push(Dispatch {
                        target: result.target_name.clone(),
                        channel: ChannelId::Email,
                        payload: payload.clone(),
                        stamps_cooldown: true,
                    });
                } else {
                    tracing::debug!("Alerts: email in cooldown for {}", result.target_name);
                }
            }
        }

        dispatches
    }

    /// Feed a latency sample into the target's tripwire.
    ///
    /// Targets without a configured threshold are ignored.
    pub fn evaluate_latency(&self, target: &TargetConfig, response_time_ms: u64) -> Vec<Dispatch> {
        let Some((threshold_ms, required)) = target.latency_tripwire() else {
            return Vec::new();
        };

        let transition = {
            let mut states = self.lock_states();
            let state = states.entry(target.name.clone()).or_default();
            state.record_latency(response_time_ms, threshold_ms, required)
        };

        let (event, consecutive) = match transition {
            None => return Vec::new(),
            Some(LatencyTransition::High(count)) => {
                tracing::warn!(
                    "Alerts: {} latency {}ms above {}ms for {} checks",
                    target.name,
                    response_time_ms,
                    threshold_ms,
                    count
                );
                (AlertEvent::LatencyHigh, count)
            }
            Some(LatencyTransition::Normal) => {
                tracing::info!("Alerts: {} latency back to {}ms", target.name, response_time_ms);
                (AlertEvent::LatencyNormal, 0)
            }
        };

        let payload = AlertPayload::Latency(LatencyPayload::new(
            event,
            target,
            response_time_ms,
            threshold_ms,
            consecutive,
        ));

        self.webhooks
            .iter()
            .filter(|hook| hook.config().enabled)
            .map(|hook| Dispatch {
                target: target.name.clone(),
                channel: ChannelId::Webhook(hook.url().to_string()),
                payload: payload.clone(),
                stamps_cooldown: false,
            })
            .collect()
    }

    fn cooldown_seconds(&self, channel: &ChannelId) -> Option<u64> {
        match channel {
            ChannelId::Webhook(url) => self
                .webhooks
                .iter()
                .find(|h| h.url() == url)
                .map(|h| h.config().cooldown_seconds),
            ChannelId::Email => self.email.as_ref().map(|e| e.config().cooldown_seconds),
        }
    }

    /// Whether an earlier delivery stamped the channel after this dispatch
    /// was decided.
    fn cooled_down_since_decision(&self, dispatch: &Dispatch) -> bool {
        if !dispatch.stamps_cooldown {
            return false;
        }
        let Some(seconds) = self.cooldown_seconds(&dispatch.channel) else {
            return false;
        };
        self.lock_states()
            .get(&dispatch.target)
            .is_some_and(|state| !state.cooldown_elapsed(&dispatch.channel, seconds, Utc::now()))
    }

    /// Deliver one dispatch. Failures are logged, never raised.
    ///
    /// Dispatches for one target must be delivered in decision order; the
    /// cooldown is checked again here so a delivery that succeeded in the
    /// meantime suppresses this one.
    pub async fn deliver(&self, dispatch: Dispatch) -> bool {
        if self.cooled_down_since_decision(&dispatch) {
            tracing::debug!(
                "Alerts: dropping {} for {}, {} in cooldown",
                dispatch.payload.event().as_str(),
                dispatch.target,
                dispatch.channel
            );
            return false;
        }

        let outcome = match &dispatch.channel {
            ChannelId::Webhook(url) => match self.webhooks.iter().find(|h| h.url() == url) {
                Some(hook) => hook.send(&self.guard, &self.retry, &dispatch.payload).await,
                None => Err(AlertError::Config(format!("unknown webhook {}", url))),
            },
            ChannelId::Email => match (&self.email, &dispatch.payload) {
                (Some(email), AlertPayload::Status(payload)) => match render_status_email(payload) {
                    Ok(content) => email.send(&self.retry, &content).await,
                    Err(e) => Err(e),
                },
                (Some(_), AlertPayload::Latency(_)) => {
                    Err(AlertError::Config("latency alerts are webhook-only".to_string()))
                }
                (None, _) => Err(AlertError::Config("email channel not configured".to_string())),
            },
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    "Alerts: sent {} for {} via {}",
                    dispatch.payload.event().as_str(),
                    dispatch.target,
                    dispatch.channel
                );
                if dispatch.stamps_cooldown {
                    let mut states = self.lock_states();
                    states
                        .entry(dispatch.target.clone())
                        .or_default()
                        .stamp(&dispatch.channel, Utc::now());
                }
                true
            }
            Err(e) => {
                tracing::error!(
                    "Alerts: failed to send {} for {} via {}: {}",
                    dispatch.payload.event().as_str(),
                    dispatch.target,
                    dispatch.channel,
                    e
                );
                false
            }
        }
    }

    /// Evaluate a result and deliver whatever it triggers.
    pub async fn on_result(&self, result: &ProbeResult) {
        for dispatch in self.evaluate(result) {
            self.deliver(dispatch).await;
        }
    }

    /// Evaluate a latency sample and deliver whatever it triggers.
    pub async fn on_latency_sample(&self, target: &TargetConfig, response_time_ms: u64) {
        for dispatch in self.evaluate_latency(target, response_time_ms) {
            self.deliver(dispatch).await;
        }
    }

    /// Send a synthetic payload to every enabled channel.
    ///
    /// Does not read or modify any per-target state.
    pub async fn test_all_channels(&self) -> BTreeMap<String, bool> {
        let status = StatusPayload::test();
        let payload = AlertPayload::Status(status.clone());
        let mut results = BTreeMap::new();

        for hook in self.webhooks.iter().filter(|h| h.config().enabled) {
            let ok = match hook.send(&self.guard, &self.retry, &payload).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Alerts: test delivery to {} failed: {}", hook.identity(), e);
                    false
                }
            };
            results.insert(hook.identity(), ok);
        }

        if let Some(email) = self.email.as_ref().filter(|e| e.config().enabled) {
            let outcome = match render_status_email(&status) {
                Ok(content) => email.send(&self.retry, &content).await,
                Err(e) => Err(e),
            };
            let ok = match outcome {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Alerts: test delivery to {} failed: {}", email.identity(), e);
                    false
                }
            };
            results.insert(email.identity(), ok);
        }

        results
    }

    /// Snapshot of a target's state.
    pub fn state_of(&self, target: &str) -> Option<TargetState> {
        self.lock_states().get(target).cloned()
    }
}
