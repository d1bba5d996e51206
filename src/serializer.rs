use std::any::Any;
use std::sync::Arc;

use crate::event::{BoxedPayload, Event};
use crate::registry::{TypeMapError, TypeRegistry};

/// Content type of every payload produced by the [`Serializer`].
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error(transparent)]
    TypeMap(#[from] TypeMapError),
    #[error("failed to (de)serialize event `{event_type}`: {source}")]
    Json {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
    #[error("event `{event_type}` is not part of `{target}`")]
    UnexpectedShape { event_type: String, target: &'static str },
}

/// A payload ready to be handed to a store or a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    pub event_type: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// JSON (de)serializer resolving event type names through a [`TypeRegistry`].
///
/// Cheap to clone: the registry is shared.
#[derive(Debug, Clone)]
pub struct Serializer {
    registry: Arc<TypeRegistry>,
}

impl Serializer {
    pub fn new(registry: impl Into<Arc<TypeRegistry>>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    /// Serializes any registered shape. `type_name` names the shape in errors and logs when it is
    /// not registered.
    pub fn serialize_payload(
        &self,
        payload: &(dyn Any + Send + Sync),
        type_name: &str,
    ) -> Result<SerializedEvent, SerializationError> {
        let registered = match self.registry.by_type_id(payload.type_id()) {
            Some(registered) => registered,
            None => {
                tracing::error!(type_name, "cannot serialize an event whose type is not registered");
                return Err(TypeMapError::UnregisteredType(type_name.to_string()).into());
            }
        };

        let bytes: Vec<u8> = (registered.encode)(payload).map_err(|source| SerializationError::Json {
            event_type: registered.name().to_string(),
            source,
        })?;

        Ok(SerializedEvent {
            event_type: registered.name().to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            payload: bytes,
        })
    }

    pub fn serialize<E: Event>(&self, event: &E) -> Result<SerializedEvent, SerializationError> {
        self.serialize_payload(event.payload(), event.type_name())
    }

    /// Decodes a persisted payload into its registered shape.
    ///
    /// An unregistered type name is an error, never skipped: dropping it silently would let a
    /// consumer move past an event it did not understand.
    pub fn deserialize_payload(
        &self,
        event_type: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<BoxedPayload, SerializationError> {
        if content_type != CONTENT_TYPE_JSON {
            return Err(SerializationError::UnsupportedContentType(content_type.to_string()));
        }

        let registered = self.registry.resolve(event_type).map_err(|error| {
            tracing::error!(event_type, "cannot deserialize an event whose type is not registered");
            error
        })?;

        (registered.decode)(bytes).map_err(|source| SerializationError::Json {
            event_type: event_type.to_string(),
            source,
        })
    }

    pub fn deserialize<E: Event>(
        &self,
        event_type: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<E, SerializationError> {
        let payload: BoxedPayload = self.deserialize_payload(event_type, content_type, bytes)?;
        E::from_payload(payload).map_err(|_| SerializationError::UnexpectedShape {
            event_type: event_type.to_string(),
            target: std::any::type_name::<E>(),
        })
    }
}
