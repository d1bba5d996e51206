use crate::repository::AggregateStoreError;
use crate::serializer::SerializationError;
use crate::store::StoreError;
use crate::types::{ExpectedStreamVersion, StreamName, StreamPosition};

use super::ExpectedState;

/// Failure of a command execution.
///
/// Every expected failure mode is a variant: callers always get either a
/// [`super::CommandOutcome`] or one of these, never a panic.
#[derive(thiserror::Error, Debug)]
pub enum CommandError<E>
where
    E: std::error::Error + 'static,
{
    /// No handler is registered for this command type. This is a programming error.
    #[error("no handler registered for command `{command}`")]
    HandlerNotFound { command: &'static str },
    /// The stream existence did not match the precondition of the command handler.
    #[error("command expected the aggregate to be {expected:?}, stream {stream} does not match")]
    ExpectedState { expected: ExpectedState, stream: StreamName },
    /// The stream changed between load and append. Never retried here.
    #[error("stream {stream} changed concurrently: expected version {expected}, actual {actual:?}")]
    Conflict {
        stream: StreamName,
        expected: ExpectedStreamVersion,
        actual: Option<StreamPosition>,
    },
    /// The business function rejected the command.
    #[error(transparent)]
    Domain(E),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl<E> CommandError<E>
where
    E: std::error::Error + 'static,
{
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, Self::ExpectedState { .. })
    }

    /// Returns the business error, if the command was rejected by the business function.
    pub fn domain(&self) -> Option<&E> {
        match self {
            Self::Domain(error) => Some(error),
            _ => None,
        }
    }
}

impl<E> From<StoreError> for CommandError<E>
where
    E: std::error::Error + 'static,
{
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::WrongExpectedVersion {
                stream,
                expected,
                actual,
            } => Self::Conflict {
                stream,
                expected,
                actual,
            },
            error => Self::Store(error),
        }
    }
}

impl<E> From<AggregateStoreError> for CommandError<E>
where
    E: std::error::Error + 'static,
{
    fn from(error: AggregateStoreError) -> Self {
        match error {
            AggregateStoreError::Store(error) => error.into(),
            AggregateStoreError::Serialization(error) => Self::Serialization(error),
        }
    }
}

/// Failure while registering a command handler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("a handler for command `{command}` is already registered")]
    AlreadyRegistered { command: &'static str },
}
