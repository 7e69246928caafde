//! Managed heap with slot recycling and mark-and-sweep collection.

use super::value::{ObjectId, Value};
use crate::model::{ClassId, FieldRef, PrimitiveValue};
use crate::result::{ExecError, ExecResult};
use std::collections::BTreeMap;

/// Storage layout of an object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    /// Plain object with declared fields
    Instance {
        /// Field values, one per declared instance field
        fields: BTreeMap<FieldRef, Value>,
    },
    /// Fixed-length array
    Array {
        /// Element type
        element: ClassId,
        /// Elements
        items: Vec<Value>,
    },
    /// Enum constant
    Enum {
        /// Constant name
        name: String,
        /// Declaration index
        ordinal: u32,
    },
    /// Class object
    ClassRef {
        /// Class it stands for
        target: ClassId,
    },
    /// Primitive wrapper
    Boxed(PrimitiveValue),
    /// Growable list
    List(Vec<Value>),
    /// Insertion-ordered set
    Set(Vec<Value>),
    /// Insertion-ordered map
    Map(Vec<(Value, Value)>),
    /// Present or empty optional
    Optional(Option<Value>),
    /// 128-bit identifier
    Uuid {
        /// High bits
        most: i64,
        /// Low bits
        least: i64,
    },
    /// Point on the time line
    Instant {
        /// Seconds since the epoch
        seconds: i64,
        /// Nanosecond adjustment
        nanos: i64,
    },
    /// Amount of time
    Duration {
        /// Whole seconds
        seconds: i64,
        /// Nanosecond adjustment
        nanos: i64,
    },
    /// Calendar date
    LocalDate {
        /// Year
        year: i32,
        /// Month, 1 to 12
        month: i32,
        /// Day of month
        day: i32,
    },
    /// Language tag
    Locale(String),
    /// Single-use sequence
    Stream {
        /// Remaining elements
        items: Vec<Value>,
        /// Whether a terminal operation already ran
        consumed: bool,
    },
    /// Dynamic proxy
    Proxy {
        /// Implemented interfaces
        interfaces: Vec<ClassId>,
        /// Receives every call
        handler: Value,
    },
    /// Lambda object
    Lambda {
        /// Functional interface
        sam: ClassId,
        /// Class declaring the synthetic method
        declaring: ClassId,
        /// Synthetic method name
        method: String,
        /// Bound receiver of an instance lambda
        receiver: Option<Value>,
        /// Leading arguments of every call
        captured: Vec<Value>,
    },
}

impl ObjectKind {
    /// Empty instance layout
    #[must_use]
    pub fn instance() -> Self {
        Self::Instance {
            fields: BTreeMap::new(),
        }
    }

    fn references(&self) -> Vec<ObjectId> {
        let values: Box<dyn Iterator<Item = &Value>> = match self {
            Self::Instance { fields } => Box::new(fields.values()),
            Self::Array { items, .. } | Self::List(items) | Self::Set(items) => {
                Box::new(items.iter())
            }
            Self::Stream { items, .. } => Box::new(items.iter()),
            Self::Map(entries) => Box::new(entries.iter().flat_map(|(k, v)| [k, v])),
            Self::Optional(value) => Box::new(value.iter()),
            Self::Proxy { handler, .. } => Box::new(std::iter::once(handler)),
            Self::Lambda {
                receiver, captured, ..
            } => Box::new(receiver.iter().chain(captured.iter())),
            _ => Box::new(std::iter::empty()),
        };
        values.filter_map(Value::object).collect()
    }
}

/// An object on the heap
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    /// Runtime class
    pub class: ClassId,
    /// Storage layout
    pub kind: ObjectKind,
}

/// Object storage. Freed slots are reused most-recently-freed first.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<u32>,
}

impl Heap {
    /// Create an empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its id
    pub fn alloc(&mut self, object: HeapObject) -> ObjectId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(object);
            return ObjectId::new(slot);
        }
        self.slots.push(Some(object));
        ObjectId::new((self.slots.len() - 1) as u32)
    }

    /// Look up a live object
    pub fn get(&self, id: ObjectId) -> ExecResult<&HeapObject> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| ExecError::heap(format!("dangling object {id}")))
    }

    /// Look up a live object for mutation
    pub fn get_mut(&mut self, id: ObjectId) -> ExecResult<&mut HeapObject> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| ExecError::heap(format!("dangling object {id}")))
    }

    /// Number of live objects
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Free every object unreachable from `roots`; returns how many were freed
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjectId>) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut pending: Vec<ObjectId> = roots.into_iter().collect();
        while let Some(id) = pending.pop() {
            let Some(mark) = marked.get_mut(id.index()) else {
                continue;
            };
            if *mark {
                continue;
            }
            *mark = true;
            if let Some(Some(object)) = self.slots.get(id.index()) {
                pending.extend(object.kind.references());
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked[index] {
                *slot = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        freed
    }
}
