use std::sync::Arc;

use tokio::sync::watch;

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreError};
use crate::subscription::{CommitPosition, CommitPositionSequence};

/// Turns confirmations, received in any order, into checkpoints that never skip an unconfirmed
/// message.
pub(crate) struct CheckpointCommitter {
    subscription_id: String,
    checkpoint_store: Arc<dyn CheckpointStore>,
    sequence: CommitPositionSequence,
    last_committed: Option<CommitPosition>,
    committed: Arc<watch::Sender<Option<CommitPosition>>>,
    /// Whether `last_committed` may not have been physically written yet.
    dirty: bool,
}

impl CheckpointCommitter {
    pub(crate) fn new(
        subscription_id: String,
        checkpoint_store: Arc<dyn CheckpointStore>,
        committed: Arc<watch::Sender<Option<CommitPosition>>>,
    ) -> Self {
        Self {
            subscription_id,
            checkpoint_store,
            sequence: CommitPositionSequence::starting_at(0),
            last_committed: None,
            committed,
            dirty: false,
        }
    }

    /// Confirms `position` as processed, storing a new checkpoint when the gapless run of confirmed
    /// positions grew.
    pub(crate) async fn confirm(&mut self, position: CommitPosition) -> Result<(), CheckpointStoreError> {
        let _ = self.sequence.insert(position);

        if let Some(committable) = self.sequence.take_committable() {
            let _ = self
                .checkpoint_store
                .store_checkpoint(Checkpoint::new(&self.subscription_id, Some(committable.position)), false)
                .await?;
            self.last_committed = Some(committable);
            self.dirty = true;
            let _ = self.committed.send_replace(Some(committable));
        }

        Ok(())
    }

    /// Force-stores the last committed checkpoint, so that deferred writes are not lost.
    pub(crate) async fn flush(&mut self) -> Result<Option<u64>, CheckpointStoreError> {
        match self.last_committed {
            Some(committed) if self.dirty => {
                let _ = self
                    .checkpoint_store
                    .store_checkpoint(Checkpoint::new(&self.subscription_id, Some(committed.position)), true)
                    .await?;
                self.dirty = false;

                tracing::info!(
                    subscription_id = %self.subscription_id,
                    position = committed.position,
                    waiting = self.waiting(),
                    "checkpoint flushed"
                );

                Ok(Some(committed.position))
            }
            committed => Ok(committed.map(|committed| committed.position)),
        }
    }

    /// Confirmed positions waiting behind an unconfirmed one.
    pub(crate) fn waiting(&self) -> usize {
        self.sequence.len()
    }
}
