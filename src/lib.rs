//! Event sourcing toolkit.
//!
//! * Aggregates fold their events into state; a [`CommandService`] executes commands against them
//!   with optimistic concurrency.
//! * A [`subscription::EventSubscription`] consumes events with bounded concurrency, and checkpoints
//!   its progress without ever moving past an event that was not handled.
//! * Producers and gateways move messages to other streams.
//!
//! Stores, checkpoint stores and producers are contracts: the crate ships in-memory
//! implementations only.

pub use crate::aggregate::{fold, Aggregate};
pub use crate::command::{CommandError, CommandOutcome, CommandService, ExpectedState, RegistrationError};
pub use crate::event::{BoxedPayload, Event, Payload};
pub use crate::metadata::Metadata;
pub use crate::registry::{TypeMapError, TypeRegistry};
pub use crate::repository::{AggregateStore, AggregateStoreError};
pub use crate::serializer::{SerializationError, Serializer};
pub use crate::state::AggregateState;
pub use crate::types::{AppendEventsResult, ExpectedStreamVersion, GlobalPosition, StreamName, StreamPosition};

pub mod aggregate;
pub mod checkpoint;
pub mod command;
pub mod event;
pub mod gateway;
pub mod metadata;
pub mod producer;
pub mod registry;
pub mod repository;
pub mod serializer;
pub mod state;
pub mod store;
pub mod subscription;
pub mod types;
