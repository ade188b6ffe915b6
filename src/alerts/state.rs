//! Per-target alert state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

use super::ChannelId;

/// What the alert engine remembers about one target.
///
/// Lives in memory only; a restart resets it.
#[derive(Debug, Default, Clone)]
pub struct TargetState {
    /// `None` until the first result is observed.
    pub last_is_up: Option<bool>,
    /// Last successful send per webhook URL.
    pub last_alert_at: HashMap<String, DateTime<Utc>>,
    pub last_email_at: Option<DateTime<Utc>>,
    pub consecutive_slow_count: u32,
    pub latency_alert_active: bool,
}

/// Latency tripwire edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyTransition {
    /// Enough consecutive slow samples; carries the count reached.
    High(u32),
    /// Back under the threshold after an alert.
    Normal,
}

impl TargetState {
    /// Feed one latency sample into the tripwire.
    pub fn record_latency(
        &mut self,
        latency_ms: u64,
        threshold_ms: u64,
        required: u32,
    ) -> Option<LatencyTransition> {
        if latency_ms > threshold_ms {
            self.consecutive_slow_count = self.consecutive_slow_count.saturating_add(1);
            if self.consecutive_slow_count >= required && !self.latency_alert_active {
                self.latency_alert_active = true;
                return Some(LatencyTransition::High(self.consecutive_slow_count));
            }
            return None;
        }

        self.consecutive_slow_count = 0;
        if self.latency_alert_active {
            self.latency_alert_active = false;
            return Some(LatencyTransition::Normal);
        }
        None
    }

    pub fn last_sent(&self, channel: &ChannelId) -> Option<DateTime<Utc>> {
        match channel {
            ChannelId::Webhook(url) => self.last_alert_at.get(url).copied(),
            ChannelId::Email => self.last_email_at,
        }
    }

    /// Whether `cooldown_seconds` have passed since the channel last sent.
    pub fn cooldown_elapsed(
        &self,
        channel: &ChannelId,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> bool {
        match self.last_sent(channel) {
            None => true,
            Some(last) => {
                let seconds = i64::try_from(cooldown_seconds).unwrap_or(i64::MAX);
                let cooldown = ChronoDuration::seconds(seconds);
                now.signed_duration_since(last) >= cooldown
            }
        }
    }

    pub fn stamp(&mut self, channel: &ChannelId, now: DateTime<Utc>) {
        match channel {
            ChannelId::Webhook(url) => {
                self.last_alert_at.insert(url.clone(), now);
            }
            ChannelId::Email => self.last_email_at = Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tripwire_hysteresis() {
        let mut state = TargetState::default();

        assert_eq!(state.record_latency(600, 500, 3), None);
        assert_eq!(state.record_latency(600, 500, 3), None);
        assert_eq!(state.record_latency(600, 500, 3), Some(LatencyTransition::High(3)));
        assert!(state.latency_alert_active);
        // Still slow: no repeat
        assert_eq!(state.record_latency(700, 500, 3), None);

        assert_eq!(state.record_latency(100, 500, 3), Some(LatencyTransition::Normal));
        assert_eq!(state.consecutive_slow_count, 0);
        assert!(!state.latency_alert_active);

        assert_eq!(state.record_latency(600, 500, 3), None);
        assert_eq!(state.record_latency(600, 500, 3), None);
        assert_eq!(state.record_latency(600, 500, 3), Some(LatencyTransition::High(3)));
    }

    #[test]
    fn test_single_spike_resets_quietly() {
        let mut state = TargetState::default();
        assert_eq!(state.record_latency(900, 500, 3), None);
        assert_eq!(state.record_latency(900, 500, 3), None);
        assert_eq!(state.record_latency(500, 500, 3), None);
        assert_eq!(state.consecutive_slow_count, 0);
        assert_eq!(state.record_latency(900, 500, 3), None);
        assert_eq!(state.consecutive_slow_count, 1);
    }

    #[test]
    fn test_cooldowns_are_per_channel() {
        let mut state = TargetState::default();
        let now = Utc::now();
        let hook_a = ChannelId::Webhook("https://a.example.com".to_string());
        let hook_b = ChannelId::Webhook("https://b.example.com".to_string());

        state.stamp(&hook_a, now);
        assert!(!state.cooldown_elapsed(&hook_a, 300, now + ChronoDuration::seconds(299)));
        assert!(state.cooldown_elapsed(&hook_a, 300, now + ChronoDuration::seconds(300)));
        assert!(state.cooldown_elapsed(&hook_b, 300, now));
        assert!(state.cooldown_elapsed(&ChannelId::Email, 300, now));

        state.stamp(&ChannelId::Email, now);
        assert!(!state.cooldown_elapsed(&ChannelId::Email, 300, now));
        assert!(state.cooldown_elapsed(&ChannelId::Email, 0, now));
    }
}
