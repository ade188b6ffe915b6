//! Per-target due times.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Next due instant for every target.
#[derive(Debug, Default)]
pub struct ScheduleState {
    next_due: HashMap<String, Instant>,
}

impl ScheduleState {
    /// Target `i` first becomes due at `start + i * stagger`.
    pub fn staggered<'a>(
        names: impl IntoIterator<Item = &'a str>,
        start: Instant,
        stagger: Duration,
    ) -> Self {
        let next_due = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let offset = stagger.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
                (name.to_string(), start + offset)
            })
            .collect();
        Self { next_due }
    }

    /// Names of targets due at `now`, earliest first.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<_> = self
            .next_due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(name, at)| (*at, name.clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, name)| name).collect()
    }

    pub fn reschedule(&mut self, name: &str, at: Instant) {
        self.next_due.insert(name.to_string(), at);
    }

    pub fn next_due(&self, name: &str) -> Option<Instant> {
        self.next_due.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_and_reschedule() {
        let start = Instant::now();
        let mut schedule =
            ScheduleState::staggered(["a", "b", "c"], start, Duration::from_secs(2));

        assert_eq!(schedule.due(start), vec!["a"]);
        assert_eq!(schedule.due(start + Duration::from_secs(3)), vec!["a", "b"]);
        assert_eq!(schedule.due(start + Duration::from_secs(4)), vec!["a", "b", "c"]);

        schedule.reschedule("a", start + Duration::from_secs(60));
        assert_eq!(schedule.due(start + Duration::from_secs(4)), vec!["b", "c"]);
        assert_eq!(schedule.next_due("a"), Some(start + Duration::from_secs(60)));
        assert_eq!(schedule.next_due("missing"), None);
    }
}
