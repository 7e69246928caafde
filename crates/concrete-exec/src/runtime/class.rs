//! Class definitions for the reference host.
//!
//! Method bodies are native closures over a [`Frame`]. Each method declares
//! its instruction list up front; bodies report progress with
//! [`Frame::at`], which is where coverage recording and interruption
//! checks happen for instrumented classes.

use super::frame::{Frame, Unwind};
use super::heap::ObjectKind;
use super::value::Value;
use crate::coverage::InstructionKind;
use crate::model::{signature_of, ClassId, ConstructorRef, MethodRef, PrimitiveValue};
use std::fmt;
use std::sync::Arc;

/// Native method body: `(frame, receiver, arguments) -> result`
pub type MethodBody =
    Arc<dyn Fn(&mut Frame<'_>, Option<Value>, &[Value]) -> Result<Value, Unwind> + Send + Sync>;

/// Kind of type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Instantiable class
    Class,
    /// Interface, never instantiated
    Interface,
    /// Enum with a fixed set of constants
    Enum,
}

/// Field visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    /// Writable by anyone
    Public,
    /// Writable only once made accessible
    Private,
}

/// Declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Simple name
    pub name: String,
    /// Declared type
    pub class_id: ClassId,
    /// Whether the field belongs to the class
    pub is_static: bool,
    /// Whether user code may reassign it
    pub is_final: bool,
    /// Access level
    pub visibility: Visibility,
    /// Initial value of a static field
    pub initial: Option<PrimitiveValue>,
}

impl FieldDef {
    /// Public mutable instance field
    #[must_use]
    pub fn instance(name: impl Into<String>, class_id: impl Into<ClassId>) -> Self {
        Self {
            name: name.into(),
            class_id: class_id.into(),
            is_static: false,
            is_final: false,
            visibility: Visibility::Public,
            initial: None,
        }
    }

    /// Public mutable static field
    #[must_use]
    pub fn static_field(name: impl Into<String>, class_id: impl Into<ClassId>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name, class_id)
        }
    }

    /// Make the field private
    #[must_use]
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Make the field final
    #[must_use]
    pub fn final_field(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Set the initial value
    #[must_use]
    pub fn with_initial(mut self, value: PrimitiveValue) -> Self {
        self.initial = Some(value);
        self
    }
}

/// Declared method or constructor
#[derive(Clone)]
pub struct MethodDef {
    /// Simple name, `<init>` for constructors
    pub name: String,
    /// Parameter types
    pub params: Vec<ClassId>,
    /// Declared return type
    pub return_type: ClassId,
    /// Whether the method has no receiver
    pub is_static: bool,
    /// Instrumented instructions, by offset
    pub instructions: Vec<InstructionKind>,
    pub(crate) body: Option<MethodBody>,
}

impl MethodDef {
    /// Abstract instance method; attach a body with [`MethodDef::with_body`]
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<ClassId>, return_type: impl Into<ClassId>) -> Self {
        Self {
            name: name.into(),
            params,
            return_type: return_type.into(),
            is_static: false,
            instructions: Vec::new(),
            body: None,
        }
    }

    /// Static method
    #[must_use]
    pub fn static_method(
        name: impl Into<String>,
        params: Vec<ClassId>,
        return_type: impl Into<ClassId>,
    ) -> Self {
        Self {
            is_static: true,
            ..Self::new(name, params, return_type)
        }
    }

    /// Constructor
    #[must_use]
    pub fn constructor(params: Vec<ClassId>) -> Self {
        Self::new(ConstructorRef::NAME, params, ClassId::VOID)
    }

    /// Declare the instruction list
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl IntoIterator<Item = InstructionKind>) -> Self {
        self.instructions = instructions.into_iter().collect();
        self
    }

    /// Attach the native body
    #[must_use]
    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut Frame<'_>, Option<Value>, &[Value]) -> Result<Value, Unwind> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// `name(params)ret`
    #[must_use]
    pub fn signature(&self) -> String {
        signature_of(&self.name, &self.params, &self.return_type)
    }

    /// Whether the method has no body
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    /// Whether this is a constructor
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ConstructorRef::NAME
    }

    /// Reference to this method as declared by `declaring`
    #[must_use]
    pub fn method_ref(&self, declaring: &ClassId) -> MethodRef {
        MethodRef::new(
            declaring.clone(),
            self.name.clone(),
            self.params.clone(),
            self.return_type.clone(),
        )
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("signature", &self.signature())
            .field("is_static", &self.is_static)
            .field("instructions", &self.instructions.len())
            .field("native", &self.body.is_some())
            .finish()
    }
}

/// Class, interface or enum definition
#[derive(Clone)]
pub struct ClassDef {
    /// Fully qualified name
    pub name: ClassId,
    /// Class, interface or enum
    pub kind: ClassKind,
    /// Direct superclass, `None` only for the root
    pub superclass: Option<ClassId>,
    /// Directly implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods and constructors
    pub methods: Vec<MethodDef>,
    /// Constant names of an enum, in ordinal order
    pub enum_constants: Vec<String>,
    pub(crate) layout: Option<fn() -> ObjectKind>,
    pub(crate) static_init: Option<MethodBody>,
}

impl ClassDef {
    /// Plain class extending `std.Object`
    #[must_use]
    pub fn class(name: impl Into<ClassId>) -> Self {
        let name = name.into();
        let superclass = (name.name() != ClassId::OBJECT).then(|| ClassId::new(ClassId::OBJECT));
        Self {
            name,
            kind: ClassKind::Class,
            superclass,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            enum_constants: Vec::new(),
            layout: None,
            static_init: None,
        }
    }

    /// Interface
    #[must_use]
    pub fn interface(name: impl Into<ClassId>) -> Self {
        Self {
            kind: ClassKind::Interface,
            superclass: None,
            ..Self::class(name)
        }
    }

    /// Enum with the given constants, in ordinal order
    #[must_use]
    pub fn enumeration(name: impl Into<ClassId>, constants: &[&str]) -> Self {
        Self {
            kind: ClassKind::Enum,
            superclass: Some(ClassId::new("std.Enum")),
            enum_constants: constants.iter().map(|c| (*c).to_string()).collect(),
            ..Self::class(name)
        }
    }

    /// Set the superclass
    #[must_use]
    pub fn extends(mut self, superclass: impl Into<ClassId>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    /// Add an implemented interface
    #[must_use]
    pub fn implements(mut self, interface: impl Into<ClassId>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Add a field
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a method
    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Run a body once when the class is loaded
    #[must_use]
    pub fn with_static_init<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut Frame<'_>, Option<Value>, &[Value]) -> Result<Value, Unwind> + Send + Sync + 'static,
    {
        self.static_init = Some(Arc::new(body));
        self
    }

    pub(crate) fn with_layout(mut self, layout: fn() -> ObjectKind) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Declared field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Index of a declared method with the given signature
    #[must_use]
    pub fn method_index(&self, signature: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.signature() == signature)
    }

    /// Index of a declared method by name and arity
    #[must_use]
    pub fn method_index_by_name(&self, name: &str, arity: usize) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.params.len() == arity)
    }

    /// Whether the class is abstract in the sense of having no instances
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    pub(crate) fn new_layout(&self) -> ObjectKind {
        self.layout.map_or_else(ObjectKind::instance, |layout| layout())
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("superclass", &self.superclass)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}
