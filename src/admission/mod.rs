//! Admission control: per-request admit, queue, or reject decisions.
//!
//! Every request passes the process-wide [`PolicyName::GlobalLimit`] first,
//! then the per-caller policy selected by its route. Limiter state is kept
//! per (policy, partition) pair in a [`PartitionedLimiterRegistry`].

mod entry;
mod fixed_window;
mod partition;
mod pipeline;
mod policy;
mod queue;
mod registry;
mod rejection;
mod state;
mod token_bucket;

pub use entry::{Acquire, LimiterEntry, Ticket};
pub use fixed_window::FixedWindow;
pub use partition::{PartitionKey, RequestDescriptor};
pub use pipeline::{Admission, AdmissionPipeline};
pub use policy::{
    FixedWindowOptions, LimiterOptions, PolicyName, PolicySet, RouteBinding, TokenBucketOptions,
};
pub use queue::{Permits, WaitQueue};
pub use registry::{LimiterKey, PartitionedLimiterRegistry};
pub use rejection::{
    RejectionBody, RejectionNotifier, RejectionRecord, CORRELATION_ID_HEADER, REJECTION_MESSAGE,
};
pub use state::{Decision, LimiterState};
pub use token_bucket::TokenBucket;
