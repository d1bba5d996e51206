use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::Payload;
use crate::metadata::Metadata;
use crate::producer::{ProduceOptions, ProducedMessage, Producer};
use crate::subscription::{EventHandler, HandlerError, HandlingStatus, MessageContext};
use crate::types::StreamName;

/// Where and what a gateway produces for a consumed message.
pub struct GatewayMessage {
    pub target_stream: StreamName,
    /// A payload whose shape is registered in the [`crate::TypeRegistry`] of the producer.
    pub message: Payload,
    pub message_type: &'static str,
    /// Added to the metadata of the produced message, on top of the causation and correlation ids.
    pub metadata: Metadata,
    pub options: ProduceOptions,
}

impl GatewayMessage {
    pub fn new<T>(target_stream: impl Into<StreamName>, message: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            target_stream: target_stream.into(),
            message: Arc::new(message),
            message_type: std::any::type_name::<T>(),
            metadata: Metadata::new(),
            options: ProduceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ProduceOptions) -> Self {
        self.options = options;
        self
    }
}

/// Routing decision of a gateway: which message, if any, a consumed message turns into.
///
/// Must be free of side effects; the [`GatewayHandler`] performs the actual produce call.
pub trait RouteAndTransform: Send + Sync {
    fn route(&self, context: &MessageContext) -> Option<GatewayMessage>;
}

impl<F> RouteAndTransform for F
where
    F: Fn(&MessageContext) -> Option<GatewayMessage> + Send + Sync,
{
    fn route(&self, context: &MessageContext) -> Option<GatewayMessage> {
        self(context)
    }
}

/// Event handler bridging a subscription to a [`Producer`].
///
/// Messages the route ignores are [`HandlingStatus::Ignored`]. Produced messages get the consumed
/// message id as causation id and keep its correlation id. The produced message id is derived from
/// the consumed one and the target stream, so a redelivered message is produced with the same id.
pub struct GatewayHandler<P, R>
where
    P: Producer,
    R: RouteAndTransform,
{
    producer: P,
    route: R,
}

impl<P, R> GatewayHandler<P, R>
where
    P: Producer,
    R: RouteAndTransform,
{
    pub fn new(producer: P, route: R) -> Self {
        Self { producer, route }
    }
}

#[async_trait]
impl<P, R> EventHandler for GatewayHandler<P, R>
where
    P: Producer,
    R: RouteAndTransform,
{
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        let Some(routed) = self.route.route(context) else {
            return Ok(HandlingStatus::Ignored);
        };

        let mut metadata: Metadata = context.metadata.caused_by(context.message_id);
        metadata.merge_missing(&routed.metadata);

        let message: ProducedMessage = ProducedMessage::from_payload(routed.message, routed.message_type)
            .with_message_id(produced_message_id(context.message_id, &routed.target_stream))
            .with_metadata(metadata);

        self.producer
            .produce(&routed.target_stream, vec![message], &Metadata::new(), routed.options)
            .await
            .map_err(HandlerError::failed)?;

        Ok(HandlingStatus::Success)
    }

    fn name(&self) -> &'static str {
        "gateway"
    }
}

fn produced_message_id(consumed: Uuid, target_stream: &StreamName) -> Uuid {
    Uuid::new_v5(&consumed, target_stream.as_str().as_bytes())
}
