use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use typed_builder::TypedBuilder;
use uuid::Uuid;

pub use event_store::EventStoreProducer;
pub use memory::{InMemoryProducer, ProducedChunk};

use crate::event::Payload;
use crate::metadata::Metadata;
use crate::serializer::SerializationError;
use crate::store::StoreError;
use crate::types::StreamName;

mod event_store;
mod memory;

/// Default maximum number of messages sent to the backend in a single call.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum ProduceError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chunk {chunk} was rejected: {reason}")]
    Rejected { chunk: usize, reason: String },
    #[error("produce did not complete within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// A message to produce, with its own metadata.
#[derive(Clone)]
pub struct ProducedMessage {
    /// Identifies the message downstream. Retrying a produce with the same message ids lets the
    /// destination deduplicate.
    pub message_id: Uuid,
    /// A payload whose shape is registered in the [`crate::TypeRegistry`].
    pub message: Payload,
    /// Names the shape of `message` when it cannot be serialized.
    pub message_type: String,
    pub metadata: Metadata,
}

impl ProducedMessage {
    pub fn new<T>(message: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::from_payload(Arc::new(message), std::any::type_name::<T>())
    }

    pub fn from_payload(message: Payload, message_type: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message,
            message_type: message_type.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl std::fmt::Debug for ProducedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducedMessage")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq)]
pub struct ProduceOptions {
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Deadline of the whole produce call, all chunks included.
    #[builder(default, setter(strip_option))]
    pub deadline: Option<Duration>,
    /// Routing key for backends that partition their destinations.
    #[builder(default, setter(strip_option, into))]
    pub partition_key: Option<String>,
}

impl Default for ProduceOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A Producer publishes messages to a destination stream, at least once.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Sends a single chunk, returning only once the backend confirmed every message of it.
    async fn produce_chunk(
        &self,
        stream: &StreamName,
        messages: Vec<ProducedMessage>,
        options: &ProduceOptions,
    ) -> Result<(), ProduceError>;

    /// Produces `messages` in chunks of `options.chunk_size`, in order. `metadata` is added to every
    /// message that does not carry the same keys already.
    ///
    /// Fails as a whole when any chunk fails, even if earlier chunks were sent: callers retry the
    /// whole call, keeping the message ids.
    async fn produce(
        &self,
        stream: &StreamName,
        messages: Vec<ProducedMessage>,
        metadata: &Metadata,
        options: ProduceOptions,
    ) -> Result<(), ProduceError> {
        let chunk_size: usize = options.chunk_size.max(1);

        let produce_all = async {
            let mut messages = messages
                .into_iter()
                .map(|mut message| {
                    message.metadata.merge_missing(metadata);
                    message
                })
                .peekable();

            let mut chunk_index: usize = 0;
            while messages.peek().is_some() {
                let chunk: Vec<ProducedMessage> = messages.by_ref().take(chunk_size).collect();

                if let Err(error) = self.produce_chunk(stream, chunk, &options).await {
                    tracing::error!({
                        stream = %stream,
                        chunk = chunk_index,
                        error = ?error,
                    }, "failed to produce chunk");

                    return Err(error);
                }

                chunk_index += 1;
            }

            Ok(())
        };

        match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, produce_all)
                .await
                .unwrap_or(Err(ProduceError::Timeout(deadline))),
            None => produce_all.await,
        }
    }
}

#[async_trait]
impl<P, T> Producer for T
where
    P: Producer + ?Sized,
    T: Deref<Target = P> + Send + Sync,
{
    /// Deref call to [`Producer::produce_chunk`].
    async fn produce_chunk(
        &self,
        stream: &StreamName,
        messages: Vec<ProducedMessage>,
        options: &ProduceOptions,
    ) -> Result<(), ProduceError> {
        self.deref().produce_chunk(stream, messages, options).await
    }
}
