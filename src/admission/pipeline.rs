//! The admission pipeline: global limit first, then the per-caller policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::entry::Acquire;
use super::partition::{PartitionKey, RequestDescriptor};
use super::policy::{PolicyName, PolicySet};
use super::registry::PartitionedLimiterRegistry;
use super::rejection::RejectionRecord;

/// The outcome of checking one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectionRecord),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Decides, for each inbound request, whether it may proceed.
///
/// The global limiter is consulted before the per-caller limiter and a
/// global rejection short-circuits: the per-caller counters are left
/// untouched. A request that passes the global limiter but is refused by its
/// per-caller limiter still counts against the global window.
pub struct AdmissionPipeline {
    policies: Arc<PolicySet>,
    registry: Arc<PartitionedLimiterRegistry>,
}

impl AdmissionPipeline {
    pub fn new(policies: PolicySet) -> Self {
        let policies = Arc::new(policies);
        Self {
            registry: Arc::new(PartitionedLimiterRegistry::new(Arc::clone(&policies))),
            policies,
        }
    }

    pub fn registry(&self) -> &Arc<PartitionedLimiterRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &Arc<PolicySet> {
        &self.policies
    }

    /// Check a request against the global and per-caller limiters.
    ///
    /// May wait while the request sits in a queue. Dropping the returned
    /// future gives up the queue position.
    pub async fn check(&self, request: &RequestDescriptor) -> Admission {
        if let Err(retry_after) = self
            .enforce(PolicyName::GlobalLimit, &PartitionKey::Global)
            .await
        {
            return self.reject(PolicyName::GlobalLimit, &PartitionKey::Global, request, retry_after);
        }

        let Some(policy) = self.policies.policy_for_path(&request.path) else {
            trace!(path = %request.path, "No per-caller policy for route");
            return Admission::Admitted;
        };

        let key = PartitionKey::resolve(request);
        match self.enforce(policy, &key).await {
            Ok(()) => {
                trace!(policy = %policy, partition = %key, "Request admitted");
                Admission::Admitted
            }
            Err(retry_after) => self.reject(policy, &key, request, retry_after),
        }
    }

    /// Run `downstream` only if the request is admitted.
    pub async fn process<F, Fut, T>(
        &self,
        request: &RequestDescriptor,
        downstream: F,
    ) -> Result<T, RejectionRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.check(request).await {
            Admission::Admitted => Ok(downstream().await),
            Admission::Rejected(record) => Err(record),
        }
    }

    /// Take a permit from one limiter, waiting in its queue if needed.
    ///
    /// On refusal returns the time until that limiter next frees capacity.
    async fn enforce(&self, policy: PolicyName, key: &PartitionKey) -> Result<(), Duration> {
        let entry = self.registry.get_or_create(policy, key, Instant::now());

        match entry.acquire(Instant::now()) {
            Acquire::Admitted => Ok(()),
            Acquire::Rejected { retry_after } => Err(retry_after),
            Acquire::Queued(ticket) => {
                debug!(
                    policy = %policy,
                    partition = %key,
                    max_wait_ms = ticket.max_wait().as_millis() as u64,
                    "Request queued"
                );
                if ticket.wait().await {
                    Ok(())
                } else {
                    Err(entry.retry_after(Instant::now()))
                }
            }
        }
    }

    fn reject(
        &self,
        policy: PolicyName,
        key: &PartitionKey,
        request: &RequestDescriptor,
        retry_after: Duration,
    ) -> Admission {
        let record = RejectionRecord::new(policy, request, retry_after);
        warn!(
            policy = %policy,
            partition = %key,
            remote_address = request.remote_address.as_deref().unwrap_or("unknown"),
            path = %request.path,
            retry_after = record.retry_after_secs,
            "Request rejected by admission control"
        );
        Admission::Rejected(record)
    }
}
