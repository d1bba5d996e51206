use async_trait::async_trait;

use crate::metadata::{tags, Metadata};
use crate::producer::{ProduceOptions, ProducedMessage, Producer};
use crate::subscription::{HandlerError, MessageContext};
use crate::types::StreamName;

/// Side channel for messages whose handling failed after every retry.
///
/// When a subscription has a failure handler, a failed message is handed to it instead of dropping
/// the subscription. If the failure handler succeeds the message counts as processed and its position
/// can be checkpointed.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle_failure(&self, context: &MessageContext, error: &HandlerError) -> Result<(), HandlerError>;

    /// The name of the failure handler, used in tracing spans.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Failure handler parking failed messages in a dedicated stream, through any [`Producer`], for
/// later inspection or replay.
///
/// The parked message keeps the original payload and metadata, plus the error and the original
/// location of the message.
pub struct ParkingFailureHandler<P>
where
    P: Producer,
{
    producer: P,
    stream: StreamName,
}

impl<P> ParkingFailureHandler<P>
where
    P: Producer,
{
    pub fn new(producer: P, stream: impl Into<StreamName>) -> Self {
        Self {
            producer,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }
}

#[async_trait]
impl<P> FailureHandler for ParkingFailureHandler<P>
where
    P: Producer,
{
    async fn handle_failure(&self, context: &MessageContext, error: &HandlerError) -> Result<(), HandlerError> {
        let mut metadata: Metadata = context
            .metadata
            .caused_by(context.message_id)
            .with(tags::ERROR, error.to_string())
            .with(tags::ORIGINAL_STREAM, context.stream.to_string())
            .with(tags::ORIGINAL_POSITION, context.stream_position.to_string());
        metadata.merge_missing(&context.metadata);

        let message: ProducedMessage =
            ProducedMessage::from_payload(context.payload.clone(), context.message_type.clone()).with_metadata(metadata);

        self.producer
            .produce(&self.stream, vec![message], &Metadata::new(), ProduceOptions::default())
            .await
            .map_err(HandlerError::failed)?;

        tracing::warn!({
            subscription_id = %context.subscription_id,
            message_id = %context.message_id,
            parking_stream = %self.stream,
        }, "message parked");

        Ok(())
    }
}
