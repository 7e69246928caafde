//! Host capability consumed by the model and value constructors.
//!
//! Everything the constructors know about live objects goes through this
//! trait: bypass construction, field access regardless of visibility,
//! reflective invocation, and synthesis of arrays, proxies and lambdas.

use super::class::{FieldDef, Visibility};
use super::frame::Unwind;
use super::heap::ObjectKind;
use super::value::{ObjectId, Value};
use crate::model::{ClassId, ExecutableRef, FieldRef};
use crate::result::ExecResult;

/// Declared instance field, as seen by the constructors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Declaring class and name
    pub field: FieldRef,
    /// Declared type
    pub class_id: ClassId,
    /// Whether the field is final
    pub is_final: bool,
    /// Declared access
    pub visibility: Visibility,
}

impl FieldInfo {
    pub(crate) fn of(declaring: &ClassId, def: &FieldDef) -> Self {
        Self {
            field: FieldRef::new(declaring.clone(), &def.name),
            class_id: def.class_id.clone(),
            is_final: def.is_final,
            visibility: def.visibility,
        }
    }
}

/// Everything needed to synthesize a lambda object
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSpec {
    /// Functional interface implemented by the lambda
    pub sam: ClassId,
    /// Class declaring the synthetic method
    pub declaring: ClassId,
    /// Synthetic method holding the body
    pub method: String,
    /// Bound receiver, for lambdas over an instance method
    pub receiver: Option<Value>,
    /// Leading arguments of every call
    pub captured: Vec<Value>,
}

/// Type-introspection and bypass-construction capability of a host
pub trait Introspection {
    /// Runtime class of an object
    fn class_of(&self, object: ObjectId) -> ExecResult<ClassId>;

    /// Storage layout of an object
    fn kind(&self, object: ObjectId) -> ExecResult<&ObjectKind>;

    /// Whether the class comes from the user class path
    fn is_user_class(&self, class: &ClassId) -> bool;

    /// Instance fields of a loaded class and all its superclasses
    fn instance_fields(&self, class: &ClassId) -> ExecResult<Vec<FieldInfo>>;

    /// Read an instance field, ignoring visibility
    fn get_field(&self, object: ObjectId, field: &FieldRef) -> ExecResult<Value>;

    /// Read a static field of a loaded class
    fn get_static(&self, field: &FieldRef) -> ExecResult<Value>;

    /// Whether the named method of a loaded class is static
    fn is_static_method(&self, class: &ClassId, name: &str) -> ExecResult<bool>;

    /// Load a class if it is not loaded yet
    fn ensure_loaded(&mut self, class: &ClassId) -> ExecResult<()>;

    /// Allocate an instance without running any constructor
    fn allocate_uninit(&mut self, class: &ClassId) -> ExecResult<ObjectId>;

    /// Toggle access to a non-public field; returns the previous setting
    fn set_accessible(&mut self, field: &FieldRef, accessible: bool) -> ExecResult<bool>;

    /// Write an instance field; private fields must be made accessible first
    fn set_field(&mut self, object: ObjectId, field: &FieldRef, value: Value) -> ExecResult<()>;

    /// Write a static field; returns the previous value
    fn set_static(&mut self, field: &FieldRef, value: Value) -> ExecResult<Value>;

    /// Invoke a method or constructor
    fn invoke(
        &mut self,
        executable: &ExecutableRef,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Unwind>;

    /// Allocate an array filled with the element type's default
    fn new_array(&mut self, element: &ClassId, length: usize) -> ExecResult<ObjectId>;

    /// Store an array element
    fn array_store(&mut self, array: ObjectId, index: usize, value: Value) -> ExecResult<()>;

    /// Object of an enum constant
    fn enum_constant(&mut self, class: &ClassId, name: &str) -> ExecResult<ObjectId>;

    /// Canonical class-reference object of a class
    fn class_ref(&mut self, class: &ClassId) -> ExecResult<ObjectId>;

    /// Class-reference object of a class, if one was ever handed out
    fn known_class_ref(&self, class: &ClassId) -> Option<ObjectId>;

    /// Dynamic proxy implementing `interfaces` that forwards to `handler`
    fn new_proxy(&mut self, interfaces: Vec<ClassId>, handler: Value) -> ExecResult<ObjectId>;

    /// Callable object bound to captured values
    fn new_lambda(&mut self, spec: LambdaSpec) -> ExecResult<ObjectId>;
}
