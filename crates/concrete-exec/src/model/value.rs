//! The value model: a closed, serializable description of runtime values.

use super::ids::{ClassId, FieldRef, Handle, MethodRef};
use super::statement::{ExecutableCall, StatementModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar value without identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveValue {
    /// `boolean`
    Bool(bool),
    /// `byte`
    Byte(i8),
    /// `short`
    Short(i16),
    /// `char`
    Char(char),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// String, modeled by value
    Str(String),
}

impl PrimitiveValue {
    /// Type of the value
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        ClassId::new(match self {
            Self::Bool(_) => ClassId::BOOLEAN,
            Self::Byte(_) => ClassId::BYTE,
            Self::Short(_) => ClassId::SHORT,
            Self::Char(_) => ClassId::CHAR,
            Self::Int(_) => ClassId::INT,
            Self::Long(_) => ClassId::LONG,
            Self::Float(_) => ClassId::FLOAT,
            Self::Double(_) => ClassId::DOUBLE,
            Self::Str(_) => ClassId::STRING,
        })
    }

    /// Zero value of a primitive type, `None` for reference types
    #[must_use]
    pub fn default_for(class: &ClassId) -> Option<Self> {
        Some(match class.name() {
            ClassId::BOOLEAN => Self::Bool(false),
            ClassId::BYTE => Self::Byte(0),
            ClassId::SHORT => Self::Short(0),
            ClassId::CHAR => Self::Char('\0'),
            ClassId::INT => Self::Int(0),
            ClassId::LONG => Self::Long(0),
            ClassId::FLOAT => Self::Float(0.0),
            ClassId::DOUBLE => Self::Double(0.0),
            _ => return None,
        })
    }

    /// Widening view used by numeric natives
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Char(v) => Some(i64::from(u32::from(*v))),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "'{v}'"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v}f"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Generic structural snapshot of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeModel {
    /// Identity within the session; `None` for detached models
    pub id: Option<Handle>,
    /// Runtime class
    pub class_id: ClassId,
    /// Whether the object stands in for a mock
    pub is_mock: bool,
    /// Field values, keyed by declaring class and name
    pub fields: BTreeMap<FieldRef, Model>,
    /// Canned return sequences, meaningful only when `is_mock` is set
    pub mocks: BTreeMap<MethodRef, Vec<Model>>,
}

impl CompositeModel {
    /// Composite with no fields and no mocks
    #[must_use]
    pub fn new(id: Option<Handle>, class_id: ClassId) -> Self {
        Self {
            id,
            class_id,
            is_mock: false,
            fields: BTreeMap::new(),
            mocks: BTreeMap::new(),
        }
    }

    /// Mark as mock
    #[must_use]
    pub fn with_mock(mut self, is_mock: bool) -> Self {
        self.is_mock = is_mock;
        self
    }

    /// Add a field value
    #[must_use]
    pub fn with_field(mut self, field: FieldRef, value: Model) -> Self {
        self.fields.insert(field, value);
        self
    }

    /// Add a canned return sequence
    #[must_use]
    pub fn with_mocked(mut self, method: MethodRef, values: Vec<Model>) -> Self {
        self.mocks.insert(method, values);
        self
    }
}

/// Sparse array: every element equals `default_fill` except the overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayModel {
    /// Identity within the session
    pub id: Option<Handle>,
    /// Array type, e.g. `int[]`
    pub class_id: ClassId,
    /// Number of elements
    pub length: usize,
    /// Value of every element not overridden
    pub default_fill: Box<Model>,
    /// Elements that differ from the fill, by index
    pub overrides: BTreeMap<usize, Model>,
}

impl ArrayModel {
    /// Element type
    #[must_use]
    pub fn element_class(&self) -> ClassId {
        self.class_id
            .element()
            .unwrap_or_else(|| ClassId::new(ClassId::OBJECT))
    }

    /// Model of the element at `index`
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&Model> {
        if index >= self.length {
            return None;
        }
        Some(self.overrides.get(&index).unwrap_or(&self.default_fill))
    }

    /// Number of elements equal to the default fill
    #[must_use]
    pub fn default_count(&self) -> usize {
        self.length.saturating_sub(self.overrides.len())
    }
}

/// Recipe: an instantiation call followed by modification statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembleModel {
    /// Identity of the assembled object
    pub id: Option<Handle>,
    /// Runtime class of the result
    pub class_id: ClassId,
    /// Short name shown to users
    pub display_name: String,
    /// Call creating the object
    pub instantiation: ExecutableCall,
    /// Appended once while the model is built, never mutated afterwards
    pub modifications: Vec<StatementModel>,
}

/// Synthetic callable bound to captured values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaModel {
    /// Identity of the lambda object
    pub id: Option<Handle>,
    /// Functional interface the lambda implements
    pub sam_type: ClassId,
    /// Class declaring the synthetic method
    pub declaring_class: ClassId,
    /// Synthetic method holding the lambda body
    pub synthetic_name: String,
    /// Captured values; the bound receiver comes first
    pub captured_values: Vec<Model>,
}

/// A value model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    /// `null` of a declared type
    Null(ClassId),
    /// Result of a `void` call
    Void,
    /// Scalar value
    Primitive(PrimitiveValue),
    /// Named constant of an enum class
    EnumConstant {
        /// Identity of the constant object
        id: Handle,
        /// Enum class
        class_id: ClassId,
        /// Constant name
        name: String,
    },
    /// Reference to a class object
    ClassRef {
        /// Identity of the class object
        id: Handle,
        /// Referenced class
        value: ClassId,
    },
    /// Structural snapshot
    Composite(CompositeModel),
    /// Sparse array
    Array(ArrayModel),
    /// Instantiation recipe
    Assemble(AssembleModel),
    /// Lambda over a synthetic method
    Lambda(LambdaModel),
}

impl Model {
    /// Null of the given type
    #[must_use]
    pub fn null(class: impl Into<ClassId>) -> Self {
        Self::Null(class.into())
    }

    /// `int` primitive
    #[must_use]
    pub const fn int(value: i32) -> Self {
        Self::Primitive(PrimitiveValue::Int(value))
    }

    /// String value
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Primitive(PrimitiveValue::Str(value.into()))
    }

    /// Identity handle, if the model carries one
    #[must_use]
    pub fn id(&self) -> Option<Handle> {
        match self {
            Self::Null(_) | Self::Void | Self::Primitive(_) => None,
            Self::EnumConstant { id, .. } | Self::ClassRef { id, .. } => Some(*id),
            Self::Composite(m) => m.id,
            Self::Array(m) => m.id,
            Self::Assemble(m) => m.id,
            Self::Lambda(m) => m.id,
        }
    }

    /// Type described by the model
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        match self {
            Self::Null(class) => class.clone(),
            Self::Void => ClassId::new(ClassId::VOID),
            Self::Primitive(p) => p.class_id(),
            Self::EnumConstant { class_id, .. } => class_id.clone(),
            Self::ClassRef { .. } => ClassId::new(ClassId::CLASS),
            Self::Composite(m) => m.class_id.clone(),
            Self::Array(m) => m.class_id.clone(),
            Self::Assemble(m) => m.class_id.clone(),
            Self::Lambda(m) => m.sam_type.clone(),
        }
    }

    /// Whether this is a null model
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Whether this is a composite flagged as mock
    #[must_use]
    pub const fn is_mock(&self) -> bool {
        matches!(self, Self::Composite(CompositeModel { is_mock: true, .. }))
    }

    /// Shallow stand-in for an already described object.
    ///
    /// Repeated and cyclic references are emitted as references: same
    /// handle and type, structure dropped. Leaves are cloned as is.
    #[must_use]
    pub fn reference(&self) -> Self {
        match self {
            Self::Composite(m) => Self::Composite(CompositeModel {
                id: m.id,
                class_id: m.class_id.clone(),
                is_mock: m.is_mock,
                fields: BTreeMap::new(),
                mocks: BTreeMap::new(),
            }),
            Self::Array(m) => Self::Array(ArrayModel {
                id: m.id,
                class_id: m.class_id.clone(),
                length: m.length,
                default_fill: m.default_fill.clone(),
                overrides: BTreeMap::new(),
            }),
            Self::Assemble(m) => Self::Assemble(AssembleModel {
                id: m.id,
                class_id: m.class_id.clone(),
                display_name: m.display_name.clone(),
                instantiation: m.instantiation.clone(),
                modifications: Vec::new(),
            }),
            Self::Lambda(m) => Self::Lambda(LambdaModel {
                id: m.id,
                sam_type: m.sam_type.clone(),
                declaring_class: m.declaring_class.clone(),
                synthetic_name: m.synthetic_name.clone(),
                captured_values: Vec::new(),
            }),
            other => other.clone(),
        }
    }

    /// How much structure the model carries at its top level; used to pick
    /// the fullest description among models sharing a handle.
    #[must_use]
    pub fn richness(&self) -> usize {
        match self {
            Self::Composite(m) => m.fields.len() + m.mocks.len(),
            Self::Array(m) => m.overrides.len(),
            Self::Assemble(m) => 1 + m.instantiation.params.len() + m.modifications.len(),
            Self::Lambda(m) => m.captured_values.len(),
            _ => 0,
        }
    }

    /// Visit this model and every nested model in pre-order
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Model)) {
        visit(self);
        match self {
            Self::Composite(m) => {
                for field in m.fields.values() {
                    field.walk(visit);
                }
                for value in m.mocks.values().flatten() {
                    value.walk(visit);
                }
            }
            Self::Array(m) => {
                m.default_fill.walk(visit);
                for value in m.overrides.values() {
                    value.walk(visit);
                }
            }
            Self::Assemble(m) => {
                m.instantiation.walk(visit);
                for statement in &m.modifications {
                    statement.walk(visit);
                }
            }
            Self::Lambda(m) => {
                for value in &m.captured_values {
                    value.walk(visit);
                }
            }
            _ => {}
        }
    }

    /// Largest handle used anywhere inside the model
    #[must_use]
    pub fn max_handle(&self) -> Option<Handle> {
        let mut max = None;
        self.walk(&mut |m| {
            if let Some(id) = m.id() {
                max = max.max(Some(id));
            }
        });
        max
    }
}

impl From<PrimitiveValue> for Model {
    fn from(value: PrimitiveValue) -> Self {
        Self::Primitive(value)
    }
}

impl From<CompositeModel> for Model {
    fn from(model: CompositeModel) -> Self {
        Self::Composite(model)
    }
}

impl From<ArrayModel> for Model {
    fn from(model: ArrayModel) -> Self {
        Self::Array(model)
    }
}

impl From<AssembleModel> for Model {
    fn from(model: AssembleModel) -> Self {
        Self::Assemble(model)
    }
}
