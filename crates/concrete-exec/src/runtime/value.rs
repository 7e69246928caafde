//! Live values of the reference host.

use crate::model::PrimitiveValue;
use std::fmt;

/// Address of a heap object. Slots are recycled after collection, so an id
/// only identifies an object while it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Create a new object id
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A live value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null reference
    Null,
    /// No value, returned by `void` methods
    Void,
    /// Scalar
    Prim(PrimitiveValue),
    /// Heap object
    Ref(ObjectId),
}

impl Value {
    /// `int` value
    #[must_use]
    pub const fn int(v: i32) -> Self {
        Self::Prim(PrimitiveValue::Int(v))
    }

    /// `long` value
    #[must_use]
    pub const fn long(v: i64) -> Self {
        Self::Prim(PrimitiveValue::Long(v))
    }

    /// `boolean` value
    #[must_use]
    pub const fn boolean(v: bool) -> Self {
        Self::Prim(PrimitiveValue::Bool(v))
    }

    /// String value
    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self::Prim(PrimitiveValue::Str(v.into()))
    }

    /// Referenced object, if any
    #[must_use]
    pub const fn object(&self) -> Option<ObjectId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Primitive payload, if any
    #[must_use]
    pub const fn primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Self::Prim(p) => Some(p),
            _ => None,
        }
    }

    /// Whether the value is null
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `int` payload
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Prim(PrimitiveValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Prim(PrimitiveValue::Str(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<PrimitiveValue> for Value {
    fn from(value: PrimitiveValue) -> Self {
        Self::Prim(value)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Ref(id)
    }
}
