use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Checkpoint, CheckpointStore, CheckpointStoreError};

/// Decorator deferring physical checkpoint writes: only every `batch_size`-th call of a subscription
/// reaches the inner store, unless the call is forced. Calls are counted per subscription id.
///
/// Reads always go to the inner store, so they reflect the last physically written checkpoint.
/// A subscription force-stores its checkpoint when it stops, so nothing confirmed is lost on a
/// clean shutdown; after a crash the events since the last physical write are delivered again.
pub struct BatchedCheckpointStore<S>
where
    S: CheckpointStore,
{
    inner: S,
    batch_size: usize,
    calls: Mutex<HashMap<String, usize>>,
}

impl<S> BatchedCheckpointStore<S>
where
    S: CheckpointStore,
{
    /// A `batch_size` of 0 or 1 writes on every call.
    pub fn new(inner: S, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Counts the call and tells whether it reaches the inner store, restarting the count if so.
    fn counts_as_write(&self, subscription_id: &str, force: bool) -> bool {
        let mut calls = self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count: &mut usize = calls.entry(subscription_id.to_string()).or_default();
        *count += 1;

        if force || *count >= self.batch_size {
            *count = 0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<S> CheckpointStore for BatchedCheckpointStore<S>
where
    S: CheckpointStore,
{
    async fn get_last_checkpoint(&self, subscription_id: &str) -> Result<Checkpoint, CheckpointStoreError> {
        self.inner.get_last_checkpoint(subscription_id).await
    }

    async fn store_checkpoint(&self, checkpoint: Checkpoint, force: bool) -> Result<Checkpoint, CheckpointStoreError> {
        if self.counts_as_write(&checkpoint.subscription_id, force) {
            self.inner.store_checkpoint(checkpoint, force).await
        } else {
            Ok(checkpoint)
        }
    }
}
