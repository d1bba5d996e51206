use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::producer::{ProduceError, ProduceOptions, ProducedMessage, Producer};
use crate::types::StreamName;

/// A chunk recorded by the [`InMemoryProducer`].
#[derive(Debug, Clone)]
pub struct ProducedChunk {
    pub stream: StreamName,
    pub messages: Vec<ProducedMessage>,
    pub options: ProduceOptions,
}

/// Producer recording every chunk in memory. Meant for tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryProducer {
    inner: Arc<Mutex<InnerProducer>>,
}

#[derive(Default)]
struct InnerProducer {
    chunks: Vec<ProducedChunk>,
    calls: usize,
    reject_chunk: Option<usize>,
}

impl InMemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer rejecting the `index`-th chunk it receives (starting at 0).
    pub fn rejecting_chunk(index: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerProducer {
                reject_chunk: Some(index),
                ..InnerProducer::default()
            })),
        }
    }

    pub async fn chunks(&self) -> Vec<ProducedChunk> {
        self.inner.lock().await.chunks.clone()
    }

    /// Every accepted message, in production order.
    pub async fn messages(&self) -> Vec<ProducedMessage> {
        self.inner
            .lock()
            .await
            .chunks
            .iter()
            .flat_map(|chunk| chunk.messages.iter().cloned())
            .collect()
    }

    /// Every accepted message produced to `stream`, in production order.
    pub async fn messages_in(&self, stream: &StreamName) -> Vec<ProducedMessage> {
        self.inner
            .lock()
            .await
            .chunks
            .iter()
            .filter(|chunk| &chunk.stream == stream)
            .flat_map(|chunk| chunk.messages.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    async fn produce_chunk(
        &self,
        stream: &StreamName,
        messages: Vec<ProducedMessage>,
        options: &ProduceOptions,
    ) -> Result<(), ProduceError> {
        let mut inner = self.inner.lock().await;
        let chunk: usize = inner.calls;
        inner.calls += 1;

        if inner.reject_chunk == Some(chunk) {
            return Err(ProduceError::Rejected {
                chunk,
                reason: "rejected by configuration".to_string(),
            });
        }

        inner.chunks.push(ProducedChunk {
            stream: stream.clone(),
            messages,
            options: options.clone(),
        });

        Ok(())
    }
}
