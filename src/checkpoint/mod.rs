use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use batched::BatchedCheckpointStore;
pub use memory::InMemoryCheckpointStore;

mod batched;
mod memory;

/// The last position a subscription processed without leaving anything unprocessed behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub subscription_id: String,
    /// `None` means the subscription starts from the beginning.
    pub position: Option<u64>,
}

impl Checkpoint {
    pub fn new(subscription_id: impl Into<String>, position: Option<u64>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            position,
        }
    }

    /// Checkpoint of a subscription that never stored one.
    pub fn empty(subscription_id: impl Into<String>) -> Self {
        Self::new(subscription_id, None)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CheckpointStoreError {
    #[error("checkpoint store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl CheckpointStoreError {
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }
}

/// Durable storage of the last checkpoint of each subscription.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the last stored checkpoint, or an empty one if the subscription never stored any.
    async fn get_last_checkpoint(&self, subscription_id: &str) -> Result<Checkpoint, CheckpointStoreError>;

    /// Stores `checkpoint`. Implementations may defer the physical write unless `force` is set.
    ///
    /// Returns the checkpoint as passed in.
    async fn store_checkpoint(&self, checkpoint: Checkpoint, force: bool) -> Result<Checkpoint, CheckpointStoreError>;
}

#[async_trait]
impl<S, T> CheckpointStore for T
where
    S: CheckpointStore + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    /// Deref call to [`CheckpointStore::get_last_checkpoint`].
    async fn get_last_checkpoint(&self, subscription_id: &str) -> Result<Checkpoint, CheckpointStoreError> {
        self.deref().get_last_checkpoint(subscription_id).await
    }

    /// Deref call to [`CheckpointStore::store_checkpoint`].
    async fn store_checkpoint(&self, checkpoint: Checkpoint, force: bool) -> Result<Checkpoint, CheckpointStoreError> {
        self.deref().store_checkpoint(checkpoint, force).await
    }
}
