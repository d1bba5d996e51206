use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::subscription::{MessageContext, RetryPolicy};

/// Extracts the partition key of a message.
pub type PartitionKeyFn = Arc<dyn Fn(&MessageContext) -> String + Send + Sync>;

/// How the messages of a subscription are dispatched to its handlers.
#[derive(Clone)]
pub enum ConsumeMode {
    /// At most `limit` messages are handled at the same time, with no ordering guarantee among them.
    Concurrent { limit: usize },
    /// Messages are routed to one of `partitions` lanes by the hash of their key. Each lane handles
    /// its messages one at a time in arrival order; lanes run concurrently.
    Partitioned { partitions: usize, key: PartitionKeyFn },
}

impl ConsumeMode {
    /// Partitioned dispatch keyed by the stream name, preserving the order of each stream.
    pub fn partitioned_by_stream(partitions: usize) -> Self {
        Self::Partitioned {
            partitions,
            key: Arc::new(|context: &MessageContext| context.stream.to_string()),
        }
    }

    /// Maximum number of messages handled at the same time.
    pub fn concurrency(&self) -> usize {
        match self {
            Self::Concurrent { limit } => (*limit).max(1),
            Self::Partitioned { partitions, .. } => (*partitions).max(1),
        }
    }
}

impl Default for ConsumeMode {
    fn default() -> Self {
        Self::Concurrent { limit: 1 }
    }
}

impl std::fmt::Debug for ConsumeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrent { limit } => f.debug_struct("Concurrent").field("limit", limit).finish(),
            Self::Partitioned { partitions, .. } => {
                f.debug_struct("Partitioned").field("partitions", partitions).finish()
            }
        }
    }
}

#[derive(TypedBuilder, Debug, Clone)]
pub struct SubscriptionOptions {
    /// Identifies the subscription, and its checkpoint, in the checkpoint store.
    #[builder(setter(into))]
    pub subscription_id: String,
    #[builder(default)]
    pub consume_mode: ConsumeMode,
    /// Maximum number of events read from the source in a single call.
    #[builder(default = 100)]
    pub page_size: usize,
    /// Delay between two reads when the source has no new event.
    #[builder(default = Duration::from_millis(500))]
    pub poll_interval: Duration,
    /// Maximum delay between two reads after consecutive failures.
    #[builder(default = Duration::from_secs(10))]
    pub poll_backoff_max: Duration,
    /// Consecutive transient read failures after which the subscription is dropped.
    #[builder(default = 10)]
    pub max_poll_failures: u32,
    #[builder(default)]
    pub retry: RetryPolicy,
    /// Deadline of a single handler call. Exceeding it counts as a failed attempt.
    #[builder(default, setter(strip_option))]
    pub handler_timeout: Option<Duration>,
}
