//! Lazily created limiter state, one entry per (policy, partition) pair.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::entry::LimiterEntry;
use super::partition::PartitionKey;
use super::policy::{PolicyName, PolicySet};

/// A key that uniquely identifies a limiter entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub policy: PolicyName,
    pub partition: PartitionKey,
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.policy, self.partition)
    }
}

/// Registry of limiter entries.
///
/// Concurrent `get_or_create` calls for the same key always return the same
/// entry: creation happens under the map shard lock.
pub struct PartitionedLimiterRegistry {
    policies: Arc<PolicySet>,
    entries: DashMap<LimiterKey, Arc<LimiterEntry>>,
}

impl PartitionedLimiterRegistry {
    pub fn new(policies: Arc<PolicySet>) -> Self {
        Self {
            policies,
            entries: DashMap::new(),
        }
    }

    /// Get the entry for `(policy, partition)`, creating it on first use.
    pub fn get_or_create(
        &self,
        policy: PolicyName,
        partition: &PartitionKey,
        now: Instant,
    ) -> Arc<LimiterEntry> {
        let key = LimiterKey {
            policy,
            partition: partition.clone(),
        };

        if let Some(entry) = self.entries.get(&key) {
            return Arc::clone(entry.value());
        }

        let entry = self.entries.entry(key).or_insert_with(|| {
            let options = *self.policies.options(policy);
            debug!(
                policy = %policy,
                partition = %partition,
                options = ?options,
                "Creating limiter entry"
            );
            Arc::new(LimiterEntry::new(options, now))
        });
        Arc::clone(entry.value())
    }

    /// Remove entries idle for at least `idle`.
    ///
    /// An entry is kept while any request holds it, while it has queued
    /// waiters, or while its lock is contended. Returns the number removed.
    pub fn evict_idle(&self, idle: Duration, now: Instant) -> usize {
        let before = self.entries.len();

        self.entries.retain(|_, entry| {
            // Only the map holds it; no check can be in flight, and none can
            // start while we hold the shard lock.
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            match entry.try_lock() {
                Some(state) => !state.is_idle(now, idle),
                None => true,
            }
        });

        before.saturating_sub(self.entries.len())
    }

    /// Spawn a background task that evicts idle entries every `interval`.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, idle: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = registry.evict_idle(idle, Instant::now());
                if removed > 0 {
                    info!(
                        removed,
                        remaining = registry.len(),
                        "Evicted idle limiter entries"
                    );
                }
            }
        })
    }

    pub fn policies(&self) -> &Arc<PolicySet> {
        &self.policies
    }

    /// Get the number of limiter entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
