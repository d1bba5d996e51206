use async_trait::async_trait;

use crate::producer::{ProduceError, ProduceOptions, ProducedMessage, Producer};
use crate::serializer::Serializer;
use crate::store::{EventStore, NewEvent};
use crate::types::{ExpectedStreamVersion, StreamName};

/// Producer appending messages as events of another stream of an [`EventStore`].
///
/// Each chunk is a single append with no version expectation. The message id becomes the event id.
pub struct EventStoreProducer<S>
where
    S: EventStore,
{
    event_store: S,
    serializer: Serializer,
}

impl<S> EventStoreProducer<S>
where
    S: EventStore,
{
    pub fn new(event_store: S, serializer: Serializer) -> Self {
        Self {
            event_store,
            serializer,
        }
    }
}

#[async_trait]
impl<S> Producer for EventStoreProducer<S>
where
    S: EventStore,
{
    async fn produce_chunk(
        &self,
        stream: &StreamName,
        messages: Vec<ProducedMessage>,
        _options: &ProduceOptions,
    ) -> Result<(), ProduceError> {
        let events: Vec<NewEvent> = messages
            .into_iter()
            .map(|message| {
                let serialized = self.serializer.serialize_payload(&*message.message, &message.message_type)?;
                Ok(NewEvent::with_id(message.message_id, serialized, message.metadata))
            })
            .collect::<Result<_, ProduceError>>()?;

        let _ = self
            .event_store
            .append_events(stream, ExpectedStreamVersion::Any, events)
            .await?;

        Ok(())
    }
}
