use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore, CheckpointStoreError};

/// Checkpoint store keeping checkpoints in memory. Every call is a physical write.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Option<u64>>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints written so far, across all subscriptions.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_last_checkpoint(&self, subscription_id: &str) -> Result<Checkpoint, CheckpointStoreError> {
        let position: Option<u64> = self.checkpoints.read().await.get(subscription_id).copied().flatten();
        Ok(Checkpoint::new(subscription_id, position))
    }

    async fn store_checkpoint(&self, checkpoint: Checkpoint, _force: bool) -> Result<Checkpoint, CheckpointStoreError> {
        let _ = self
            .checkpoints
            .write()
            .await
            .insert(checkpoint.subscription_id.clone(), checkpoint.position);
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);

        tracing::trace!(subscription_id = %checkpoint.subscription_id, position = ?checkpoint.position, "checkpoint stored");

        Ok(checkpoint)
    }
}
