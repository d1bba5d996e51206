use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::store::StoreError;
use crate::subscription::{EventSource, SubscriptionError};

/// How far a subscription is behind its source. Observability only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGap {
    pub subscription_id: String,
    /// Number of positions between the checkpoint and the head of the source.
    pub position_gap: u64,
    /// Time elapsed since the checkpointed event was written, zero when there is no gap.
    pub time_gap: Duration,
}

impl SubscriptionGap {
    pub(crate) fn compute(
        subscription_id: &str,
        head: Option<u64>,
        checkpoint: Option<u64>,
        last_event_time: Option<DateTime<Utc>>,
    ) -> Self {
        let position_gap: u64 = match (head, checkpoint) {
            (None, _) => 0,
            (Some(head), None) => head + 1,
            (Some(head), Some(checkpoint)) => head.saturating_sub(checkpoint),
        };

        let time_gap: Duration = match last_event_time {
            Some(time) if position_gap > 0 => (Utc::now() - time).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };

        Self {
            subscription_id: subscription_id.to_string(),
            position_gap,
            time_gap,
        }
    }
}

/// Measures the gap of any subscription from its stored checkpoint, e.g. from a process monitoring
/// subscriptions running elsewhere.
///
/// The time gap is measured from the event at the checkpoint, read back from the source.
pub async fn measure_gap<S, C>(
    source: &S,
    checkpoint_store: &C,
    subscription_id: &str,
) -> Result<SubscriptionGap, SubscriptionError>
where
    S: EventSource + ?Sized,
    C: CheckpointStore + ?Sized,
{
    let checkpoint: Checkpoint = checkpoint_store.get_last_checkpoint(subscription_id).await?;
    let head: Option<u64> = source.head_position().await?;

    let last_event_time: Option<DateTime<Utc>> = match checkpoint.position {
        Some(position) => checkpointed_event_time(source, position).await?,
        None => None,
    };

    Ok(SubscriptionGap::compute(
        subscription_id,
        head,
        checkpoint.position,
        last_event_time,
    ))
}

async fn checkpointed_event_time<S>(source: &S, position: u64) -> Result<Option<DateTime<Utc>>, StoreError>
where
    S: EventSource + ?Sized,
{
    let after: Option<u64> = position.checked_sub(1);
    let events = source.read_after(after, 1).await?;
    Ok(events.first().map(|event| event.occurred_on))
}
