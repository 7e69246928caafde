//! Type-safe identifiers for classes, fields and executables.
//!
//! All identifiers order totally so they can key `BTreeMap`s inside models,
//! which keeps serialized models deterministic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity key shared by every model that denotes the same object within
/// one before/after session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    /// Create a new handle
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
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fully qualified type name, e.g. `samples.Node`, `int`, `std.Integer[]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(String);

impl ClassId {
    /// Primitive `boolean`
    pub const BOOLEAN: &'static str = "boolean";
    /// Primitive `byte`
    pub const BYTE: &'static str = "byte";
    /// Primitive `short`
    pub const SHORT: &'static str = "short";
    /// Primitive `char`
    pub const CHAR: &'static str = "char";
    /// Primitive `int`
    pub const INT: &'static str = "int";
    /// Primitive `long`
    pub const LONG: &'static str = "long";
    /// Primitive `float`
    pub const FLOAT: &'static str = "float";
    /// Primitive `double`
    pub const DOUBLE: &'static str = "double";
    /// Return type of methods without a result
    pub const VOID: &'static str = "void";
    /// Built-in string type
    pub const STRING: &'static str = "std.String";
    /// Root of the class hierarchy
    pub const OBJECT: &'static str = "std.Object";
    /// Type of class-reference objects
    pub const CLASS: &'static str = "std.Class";

    const PRIMITIVES: [&'static str; 8] = [
        Self::BOOLEAN,
        Self::BYTE,
        Self::SHORT,
        Self::CHAR,
        Self::INT,
        Self::LONG,
        Self::FLOAT,
        Self::DOUBLE,
    ];

    /// Create a class id from its name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The class name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is one of the eight primitive types
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        Self::PRIMITIVES.contains(&self.0.as_str())
    }

    /// Whether values of this type are immutable scalars without identity
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.is_primitive() || self.0 == Self::STRING || self.0 == Self::VOID
    }

    /// Whether this names an array type
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.ends_with("[]")
    }

    /// Element type of an array type
    #[must_use]
    pub fn element(&self) -> Option<Self> {
        self.0.strip_suffix("[]").map(Self::new)
    }

    /// Array type whose elements are of this type
    #[must_use]
    pub fn array_of(&self) -> Self {
        Self(format!("{}[]", self.0))
    }

    /// Whether the class belongs to the host standard library
    #[must_use]
    pub fn is_std(&self) -> bool {
        self.0.starts_with("std.") || self.is_primitive()
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Reference to a field of a class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    /// Class declaring the field
    pub declaring: ClassId,
    /// Field name
    pub name: String,
}

impl FieldRef {
    /// Create a field reference
    #[must_use]
    pub fn new(declaring: impl Into<ClassId>, name: impl Into<String>) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring, self.name)
    }
}

/// Reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    /// Class declaring the method
    pub declaring: ClassId,
    /// Method name
    pub name: String,
    /// Parameter types
    pub params: Vec<ClassId>,
    /// Return type
    pub return_type: ClassId,
}

impl MethodRef {
    /// Create a method reference
    #[must_use]
    pub fn new(
        declaring: impl Into<ClassId>,
        name: impl Into<String>,
        params: Vec<ClassId>,
        return_type: impl Into<ClassId>,
    ) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
            params,
            return_type: return_type.into(),
        }
    }

    /// Signature without the declaring class: `name(p1,p2)ret`
    #[must_use]
    pub fn signature(&self) -> String {
        signature_of(&self.name, &self.params, &self.return_type)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring, self.signature())
    }
}

/// Reference to a constructor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstructorRef {
    /// Class being constructed
    pub class: ClassId,
    /// Parameter types
    pub params: Vec<ClassId>,
}

impl ConstructorRef {
    /// Name constructors are registered under
    pub const NAME: &'static str = "<init>";

    /// Create a constructor reference
    #[must_use]
    pub fn new(class: impl Into<ClassId>, params: Vec<ClassId>) -> Self {
        Self {
            class: class.into(),
            params,
        }
    }

    /// Signature without the class: `<init>(p1,p2)void`
    #[must_use]
    pub fn signature(&self) -> String {
        signature_of(Self::NAME, &self.params, &ClassId::new(ClassId::VOID))
    }
}

/// Anything that can be called: a method or a constructor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutableRef {
    /// Instance or static method
    Method(MethodRef),
    /// Constructor
    Constructor(ConstructorRef),
}

impl ExecutableRef {
    /// Class that declares the executable
    #[must_use]
    pub fn declaring(&self) -> &ClassId {
        match self {
            Self::Method(m) => &m.declaring,
            Self::Constructor(c) => &c.class,
        }
    }

    /// Signature without the declaring class
    #[must_use]
    pub fn signature(&self) -> String {
        match self {
            Self::Method(m) => m.signature(),
            Self::Constructor(c) => c.signature(),
        }
    }

    /// Parameter types
    #[must_use]
    pub fn params(&self) -> &[ClassId] {
        match self {
            Self::Method(m) => &m.params,
            Self::Constructor(c) => &c.params,
        }
    }
}

impl From<MethodRef> for ExecutableRef {
    fn from(method: MethodRef) -> Self {
        Self::Method(method)
    }
}

impl From<ConstructorRef> for ExecutableRef {
    fn from(ctor: ConstructorRef) -> Self {
        Self::Constructor(ctor)
    }
}

pub(crate) fn signature_of(name: &str, params: &[ClassId], ret: &ClassId) -> String {
    let params: Vec<&str> = params.iter().map(ClassId::name).collect();
    format!("{}({}){}", name, params.join(","), ret)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod class_id_tests {
        use super::*;

        #[test]
        fn test_primitive_detection() {
            assert!(ClassId::new("int").is_primitive());
            assert!(!ClassId::new("std.Integer").is_primitive());
            assert!(ClassId::new(ClassId::STRING).is_value_type());
        }

        #[test]
        fn test_array_helpers() {
            let arr = ClassId::new("int").array_of();
            assert_eq!(arr.name(), "int[]");
            assert!(arr.is_array());
            assert_eq!(arr.element(), Some(ClassId::new("int")));
            assert_eq!(ClassId::new("int").element(), None);
        }

        #[test]
        fn test_std_detection() {
            assert!(ClassId::new("std.ArrayList").is_std());
            assert!(!ClassId::new("samples.Node").is_std());
        }
    }

    mod executable_tests {
        use super::*;

        #[test]
        fn test_method_signature() {
            let m = MethodRef::new("a.B", "add", vec!["int".into(), "int".into()], "int");
            assert_eq!(m.signature(), "add(int,int)int");
            assert_eq!(m.to_string(), "a.B.add(int,int)int");
        }

        #[test]
        fn test_constructor_signature() {
            let c = ConstructorRef::new("a.B", vec![]);
            assert_eq!(c.signature(), "<init>()void");
            let exec: ExecutableRef = c.into();
            assert_eq!(exec.declaring().name(), "a.B");
        }

        #[test]
        fn test_handle_ordering() {
            assert!(Handle::new(1) < Handle::new(2));
            assert_eq!(Handle::new(7).to_string(), "#7");
        }
    }
}
