//! Retention pruning of old probe results.

use crate::db::Store;

/// How long results are kept and how often pruning runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    /// Prune every N dispatch cycles; 0 disables pruning.
    pub every_cycles: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            every_cycles: 100,
        }
    }
}

impl RetentionPolicy {
    pub fn is_due(&self, cycle: u64) -> bool {
        self.every_cycles > 0 && cycle > 0 && cycle % self.every_cycles == 0
    }
}

/// Prune expired results, logging rather than returning failures.
pub fn process_retention(store: &Store, policy: &RetentionPolicy) -> Option<usize> {
    match store.prune(policy.retention_days) {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(
                    "RetentionManager: Deleted {} results older than {} days",
                    deleted,
                    policy.retention_days
                );
            }
            Some(deleted)
        }
        Err(e) => {
            tracing::error!("RetentionManager: Failed to prune results: {}", e);
            None
        }
    }
}
