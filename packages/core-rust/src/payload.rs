//! Type-erased operation values and the runtime type tags that describe them.
//!
//! A [`ServiceDefinition`](crate::ServiceDefinition) declares the input and
//! output type of every operation as a [`TypeTag`]. Values flowing through the
//! dispatcher are [`Payload`]s: a boxed value plus the tag of its concrete type,
//! so it can be downcast back to the declared type or encoded into a
//! serializer-neutral JSON document.

use std::any::{type_name, Any, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::serializer::SerializerError;

type BoxedValue = Box<dyn Any + Send + Sync>;
type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value, SerializerError>;
type DecodeFn = fn(serde_json::Value) -> Result<BoxedValue, SerializerError>;

/// Bound satisfied by every type usable as an operation input or output.
pub trait PayloadType: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PayloadType for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

// ---------------------------------------------------------------------------
// TypeTag
// ---------------------------------------------------------------------------

/// Runtime tag for a declared operation input or output type.
///
/// Tags compare equal iff they describe the same Rust type. Each tag carries
/// monomorphized codec functions, so a value can be decoded into the declared
/// type without the caller naming that type statically.
#[derive(Clone, Copy)]
pub struct TypeTag {
    name: &'static str,
    id: TypeId,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeTag {
    /// Returns the tag for `T`.
    #[must_use]
    pub fn of<T: PayloadType>() -> Self {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
            encode: encode_as::<T>,
            decode: decode_as::<T>,
        }
    }

    /// Fully-qualified Rust type name, used in error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if this tag describes `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Decodes a JSON document into a payload of this type.
    ///
    /// # Errors
    ///
    /// Returns `SerializerError::Json` if the document does not have the shape
    /// of the tagged type.
    pub fn decode(&self, document: serde_json::Value) -> Result<Payload, SerializerError> {
        let value = (self.decode)(document)?;
        Ok(Payload { tag: *self, value })
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeTag").field(&self.name).finish()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn encode_as<T: PayloadType>(
    value: &(dyn Any + Send + Sync),
) -> Result<serde_json::Value, SerializerError> {
    let typed = value
        .downcast_ref::<T>()
        .ok_or(SerializerError::TypeMismatch {
            expected: type_name::<T>(),
            actual: "<erased>",
        })?;
    Ok(serde_json::to_value(typed)?)
}

fn decode_as<T: PayloadType>(document: serde_json::Value) -> Result<BoxedValue, SerializerError> {
    let typed: T = serde_json::from_value(document)?;
    Ok(Box::new(typed))
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A type-erased operation value tagged with its concrete type.
pub struct Payload {
    tag: TypeTag,
    value: BoxedValue,
}

impl Payload {
    /// Wraps a concrete value.
    pub fn new<T: PayloadType>(value: T) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            value: Box::new(value),
        }
    }

    /// Decodes `document` as the type described by `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the tagged type.
    pub fn from_document(tag: TypeTag, document: serde_json::Value) -> Result<Self, SerializerError> {
        tag.decode(document)
    }

    /// The tag of the wrapped value's concrete type.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns true if the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.tag.is::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Unwraps the value as a `T`, handing the payload back on mismatch.
    ///
    /// # Errors
    ///
    /// Returns the original payload if it does not hold a `T`.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let tag = self.tag;
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(Self { tag, value }),
        }
    }

    /// Encodes the value into a serializer-neutral JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the value's `Serialize` implementation fails.
    pub fn to_document(&self) -> Result<serde_json::Value, SerializerError> {
        (self.tag.encode)(&*self.value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.tag.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
