use std::any::Any;
use std::sync::Arc;

/// A decoded event payload whose concrete shape is only known at runtime.
pub type BoxedPayload = Box<dyn Any + Send + Sync>;

/// A shared decoded payload, handed to every handler of a subscription.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The set of event shapes an aggregate emits, usually an enum with one variant per shape.
///
/// Every shape must be registered in the [`crate::TypeRegistry`] under its stable name: the
/// registry resolves the name found in the store to a shape decoder, and [`Event::from_payload`]
/// folds the decoded shape back into the sum type. Prefer the [`crate::event_set!`] macro over
/// writing this by hand.
pub trait Event: Send + Sync + Sized + 'static {
    /// Borrows the concrete shape carried by this event.
    fn payload(&self) -> &(dyn Any + Send + Sync);

    /// Rust type name of the concrete shape, used to report shapes missing from the registry.
    fn type_name(&self) -> &'static str;

    /// Wraps a decoded shape into the sum type, handing the payload back if the shape is not
    /// part of this set.
    fn from_payload(payload: BoxedPayload) -> Result<Self, BoxedPayload>;
}

/// Declares an event sum type and implements [`Event`] and `From<Shape>` for it.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Deposited {
///     pub amount: u64,
/// }
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Withdrawn {
///     pub amount: u64,
/// }
///
/// eskit::event_set! {
///     #[derive(Debug, Clone)]
///     pub enum AccountEvent {
///         Deposited(Deposited),
///         Withdrawn(Withdrawn),
///     }
/// }
///
/// let event: AccountEvent = Deposited { amount: 10 }.into();
/// assert!(matches!(event, AccountEvent::Deposited(_)));
/// ```
///
/// Each shape may appear in a single variant only.
#[macro_export]
macro_rules! event_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident($shape:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($shape)),+
        }

        impl $crate::event::Event for $name {
            fn payload(&self) -> &(dyn ::std::any::Any + Send + Sync) {
                match self {
                    $(Self::$variant(payload) => payload as &(dyn ::std::any::Any + Send + Sync)),+
                }
            }

            fn type_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => ::std::any::type_name::<$shape>()),+
                }
            }

            fn from_payload(
                payload: $crate::event::BoxedPayload,
            ) -> ::std::result::Result<Self, $crate::event::BoxedPayload> {
                $(
                    let payload = match payload.downcast::<$shape>() {
                        Ok(shape) => return Ok(Self::$variant(*shape)),
                        Err(other) => other,
                    };
                )+
                Err(payload)
            }
        }

        $(
            impl ::std::convert::From<$shape> for $name {
                fn from(shape: $shape) -> Self {
                    Self::$variant(shape)
                }
            }
        )+
    };
}
