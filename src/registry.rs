use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::event::BoxedPayload;

pub(crate) type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, serde_json::Error>;
pub(crate) type DecodeFn = fn(&[u8]) -> Result<BoxedPayload, serde_json::Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeMapError {
    /// The name is already mapped to another shape.
    #[error("event type `{name}` is already registered for `{existing}`, cannot register it for `{attempted}`")]
    DuplicateName {
        name: String,
        existing: &'static str,
        attempted: &'static str,
    },
    /// The shape is already mapped to another name.
    #[error("`{rust_type}` is already registered as `{existing}`, cannot register it as `{attempted}`")]
    DuplicateType {
        rust_type: &'static str,
        existing: String,
        attempted: String,
    },
    #[error("event type `{0}` is not registered")]
    UnknownName(String),
    #[error("`{0}` is not registered as an event type")]
    UnregisteredType(String),
}

/// A shape known to the [`TypeRegistry`], with its JSON codec.
pub struct RegisteredType {
    name: String,
    type_id: TypeId,
    rust_type: &'static str,
    pub(crate) encode: EncodeFn,
    pub(crate) decode: DecodeFn,
}

impl std::fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredType")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type)
            .finish()
    }
}

impl RegisteredType {
    /// Stable event type name, as persisted in the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the shape, for diagnostics.
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }
}

/// Bidirectional mapping between stable event type names and runtime payload shapes.
///
/// The registry is built once at process start through explicit [`TypeRegistry::register`]
/// calls, then frozen behind an `Arc` and handed to the [`crate::Serializer`]. Conflicting
/// registrations are reported as errors so that startup can fail fast.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_name: HashMap<String, RegisteredType>,
    names_by_type: HashMap<TypeId, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `name` to the shape `T`.
    ///
    /// Registering the same pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if `name` is already mapped to another shape, or `T` to another name.
    pub fn register<T>(&mut self, name: impl Into<String>) -> Result<&mut Self, TypeMapError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let name: String = name.into();
        let type_id: TypeId = TypeId::of::<T>();
        let rust_type: &'static str = std::any::type_name::<T>();

        if let Some(existing) = self.by_name.get(&name) {
            return if existing.type_id == type_id {
                Ok(self)
            } else {
                Err(TypeMapError::DuplicateName {
                    name,
                    existing: existing.rust_type,
                    attempted: rust_type,
                })
            };
        }

        if let Some(existing) = self.names_by_type.get(&type_id) {
            return Err(TypeMapError::DuplicateType {
                rust_type,
                existing: existing.clone(),
                attempted: name,
            });
        }

        tracing::debug!(event_type = %name, rust_type, "registered event type");

        let _ = self.names_by_type.insert(type_id, name.clone());
        let _ = self.by_name.insert(
            name.clone(),
            RegisteredType {
                name,
                type_id,
                rust_type,
                encode: encode::<T>,
                decode: decode::<T>,
            },
        );

        Ok(self)
    }

    /// Resolves a persisted type name to its shape.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredType, TypeMapError> {
        self.by_name
            .get(name)
            .ok_or_else(|| TypeMapError::UnknownName(name.to_string()))
    }

    /// Returns the name `T` is registered under.
    pub fn name_of<T: 'static>(&self) -> Result<&str, TypeMapError> {
        self.names_by_type
            .get(&TypeId::of::<T>())
            .map(String::as_str)
            .ok_or_else(|| TypeMapError::UnregisteredType(std::any::type_name::<T>().to_string()))
    }

    pub(crate) fn by_type_id(&self, type_id: TypeId) -> Option<&RegisteredType> {
        self.names_by_type
            .get(&type_id)
            .and_then(|name| self.by_name.get(name))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn encode<T>(payload: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize + 'static,
{
    match payload.downcast_ref::<T>() {
        Some(payload) => serde_json::to_vec(payload),
        None => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "payload is not a `{}`",
            std::any::type_name::<T>()
        ))),
    }
}

fn decode<T>(bytes: &[u8]) -> Result<BoxedPayload, serde_json::Error>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Box::new(serde_json::from_slice::<T>(bytes)?))
}
