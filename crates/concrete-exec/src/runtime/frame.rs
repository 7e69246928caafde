//! Activation frames: the API native method bodies are written against.

use super::class::ClassDef;
use super::heap::ObjectKind;
use super::introspection::{Introspection, LambdaSpec};
use super::machine::Machine;
use super::sandbox::Permission;
use super::value::{ObjectId, Value};
use crate::coverage::InstructionId;
use crate::model::{ClassId, FieldRef, PrimitiveValue};
use crate::result::ExecError;
use std::fmt;
use std::sync::Arc;

/// Abnormal completion of host code
#[derive(Debug)]
pub enum Unwind {
    /// A thrown exception object
    Exception(ObjectId),
    /// The watchdog asked running code to stop
    Interrupted,
    /// A sandboxed operation was refused
    Sandbox(String),
    /// A mocked call had nothing to return
    MockResolution(String),
    /// The host itself failed (unknown class, arity mismatch, ...)
    Host(ExecError),
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(object) => write!(f, "exception {object}"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Sandbox(message) => write!(f, "sandbox: {message}"),
            Self::MockResolution(message) => write!(f, "mock resolution: {message}"),
            Self::Host(err) => write!(f, "host: {err}"),
        }
    }
}

impl From<ExecError> for Unwind {
    fn from(err: ExecError) -> Self {
        Self::Host(err)
    }
}

/// One method activation.
///
/// Allocations made through a frame are attributed to the frame's class,
/// which is the call site new-instance mocks filter on.
pub struct Frame<'m> {
    machine: &'m mut Machine,
    class: Arc<ClassDef>,
    method: Option<usize>,
    call_id: u64,
    offset: Option<(u32, u32)>,
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("class", &self.class.name)
            .field("method", &self.method.map(|i| self.class.methods[i].signature()))
            .field("call_id", &self.call_id)
            .finish()
    }
}

impl<'m> Frame<'m> {
    pub(crate) fn new(
        machine: &'m mut Machine,
        class: Arc<ClassDef>,
        method: Option<usize>,
        call_id: u64,
        offset: Option<(u32, u32)>,
    ) -> Self {
        Self {
            machine,
            class,
            method,
            call_id,
            offset,
        }
    }

    /// Class executing this frame
    #[must_use]
    pub fn class_id(&self) -> &ClassId {
        &self.class.name
    }

    /// Mark instruction `local` of the current method as executed.
    ///
    /// Records coverage for instrumented classes and unwinds with
    /// [`Unwind::Interrupted`] once the watchdog has fired.
    pub fn at(&mut self, local: u32) -> Result<(), Unwind> {
        if self.machine.interrupted() {
            return Err(Unwind::Interrupted);
        }
        if let (Some((class_index, base)), Some(index)) = (self.offset, self.method) {
            let kind = self.class.methods[index]
                .instructions
                .get(local as usize)
                .copied()
                .unwrap_or_default();
            self.machine.trace_mut().record(
                self.call_id,
                InstructionId::new(class_index, base + local),
                kind,
            );
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Calls and allocation
    // ---------------------------------------------------------------------

    /// Virtual call by name
    pub fn call(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value, Unwind> {
        self.machine.call_virtual(receiver, name, args)
    }

    /// Static call by name
    pub fn call_static(&mut self, class: &str, name: &str, args: &[Value]) -> Result<Value, Unwind> {
        self.machine.call_static(&ClassId::new(class), name, args)
    }

    /// `new class(args)`, attributed to this frame's class
    pub fn new_object(&mut self, class: &str, args: &[Value]) -> Result<Value, Unwind> {
        let site = self.class.name.clone();
        self.machine
            .instantiate(&ClassId::new(class), None, args, Some(&site))
    }

    /// Lambda over a synthetic method of this frame's class
    pub fn new_lambda(
        &mut self,
        sam: &str,
        method: &str,
        receiver: Option<Value>,
        captured: Vec<Value>,
    ) -> Result<Value, Unwind> {
        let spec = LambdaSpec {
            sam: ClassId::new(sam),
            declaring: self.class.name.clone(),
            method: method.to_string(),
            receiver,
            captured,
        };
        Ok(Value::Ref(self.machine.new_lambda(spec)?))
    }

    // ---------------------------------------------------------------------
    // Fields
    // ---------------------------------------------------------------------

    fn resolve_field(&mut self, object: ObjectId, name: &str) -> Result<FieldRef, Unwind> {
        let class = self.machine.class_of(object)?;
        let fields = self.machine.instance_fields(&class)?;
        fields
            .into_iter()
            .find(|f| f.field.name == name)
            .map(|f| f.field)
            .ok_or_else(|| Unwind::Host(ExecError::field_not_found(class.name(), name)))
    }

    /// Read an instance field by name
    pub fn get_field(&mut self, object: &Value, name: &str) -> Result<Value, Unwind> {
        let id = self.non_null(object, name)?;
        let field = self.resolve_field(id, name)?;
        Ok(self.machine.get_field(id, &field)?)
    }

    /// Write an instance field by name
    pub fn set_field(&mut self, object: &Value, name: &str, value: Value) -> Result<(), Unwind> {
        let id = self.non_null(object, name)?;
        let field = self.resolve_field(id, name)?;
        match &mut self.machine.heap_mut().get_mut(id)?.kind {
            ObjectKind::Instance { fields } => {
                fields.insert(field, value);
                Ok(())
            }
            _ => Err(Unwind::Host(ExecError::field_not_found(field.declaring.name(), name))),
        }
    }

    /// Read a static field
    pub fn get_static(&mut self, class: &str, name: &str) -> Result<Value, Unwind> {
        let class = ClassId::new(class);
        self.machine.load_class(&class)?;
        Ok(self.machine.get_static(&FieldRef::new(class, name))?)
    }

    /// Write a static field
    pub fn set_static(&mut self, class: &str, name: &str, value: Value) -> Result<(), Unwind> {
        let field = FieldRef::new(class, name);
        self.machine.set_static(&field, value)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Exceptions and checks
    // ---------------------------------------------------------------------

    /// Build an exception of `class`; return it with `Err(..)` to throw
    pub fn throw(&mut self, class: &str, message: impl AsRef<str>) -> Unwind {
        self.machine.throw_new(class, message.as_ref())
    }

    /// Whether `value` is an object assignable to `class`
    #[must_use]
    pub fn is_instance(&self, value: &Value, class: &str) -> bool {
        value
            .object()
            .and_then(|id| self.machine.class_of(id).ok())
            .is_some_and(|actual| self.machine.is_assignable(&actual, &ClassId::new(class)))
    }

    /// Refuse the operation unless the sandbox grants `permission`
    pub fn check(&self, permission: Permission) -> Result<(), Unwind> {
        self.machine.check_permission(permission)
    }

    fn non_null(&mut self, value: &Value, what: &str) -> Result<ObjectId, Unwind> {
        match value.object() {
            Some(id) => Ok(id),
            None => Err(self.throw("std.NullPointerException", format!("{what} on null"))),
        }
    }

    // ---------------------------------------------------------------------
    // Typed access
    // ---------------------------------------------------------------------

    /// `int` payload or `ClassCastException`
    pub fn int(&mut self, value: &Value) -> Result<i32, Unwind> {
        match value {
            Value::Prim(PrimitiveValue::Int(v)) => Ok(*v),
            other => Err(self.throw("std.ClassCastException", format!("{other:?} is not an int"))),
        }
    }

    /// `long` payload (ints widen) or `ClassCastException`
    pub fn long(&mut self, value: &Value) -> Result<i64, Unwind> {
        match value.primitive().and_then(PrimitiveValue::as_i64) {
            Some(v) => Ok(v),
            None => Err(self.throw("std.ClassCastException", format!("{value:?} is not a long"))),
        }
    }

    /// `boolean` payload or `ClassCastException`
    pub fn boolean(&mut self, value: &Value) -> Result<bool, Unwind> {
        match value {
            Value::Prim(PrimitiveValue::Bool(v)) => Ok(*v),
            other => Err(self.throw("std.ClassCastException", format!("{other:?} is not a boolean"))),
        }
    }

    /// String payload; null becomes `NullPointerException`
    pub fn string(&mut self, value: &Value) -> Result<String, Unwind> {
        match value {
            Value::Prim(PrimitiveValue::Str(s)) => Ok(s.clone()),
            Value::Null => Err(self.throw("std.NullPointerException", "string is null")),
            other => Err(self.throw("std.ClassCastException", format!("{other:?} is not a string"))),
        }
    }

    /// Integer division; a zero divisor throws `ArithmeticException`
    pub fn div_int(&mut self, a: i32, b: i32) -> Result<i32, Unwind> {
        if b == 0 {
            return Err(self.throw("std.ArithmeticException", "/ by zero"));
        }
        Ok(a.wrapping_div(b))
    }

    // ---------------------------------------------------------------------
    // Arrays
    // ---------------------------------------------------------------------

    /// Allocate an array
    pub fn new_array(&mut self, element: &str, length: i32) -> Result<Value, Unwind> {
        if length < 0 {
            return Err(self.throw("std.NegativeArraySizeException", length.to_string()));
        }
        Ok(Value::Ref(self.machine.new_array(&ClassId::new(element), length as usize)?))
    }

    /// Array length
    pub fn array_len(&mut self, array: &Value) -> Result<i32, Unwind> {
        let id = self.non_null(array, "length")?;
        match self.kind(id)? {
            ObjectKind::Array { items, .. } => Ok(items.len() as i32),
            _ => Err(self.throw("std.ClassCastException", "not an array")),
        }
    }

    /// Array load with bounds check
    pub fn array_get(&mut self, array: &Value, index: i32) -> Result<Value, Unwind> {
        let id = self.non_null(array, "array load")?;
        let item = match self.kind(id)? {
            ObjectKind::Array { items, .. } => usize::try_from(index).ok().and_then(|i| items.get(i)).cloned(),
            _ => return Err(self.throw("std.ClassCastException", "not an array")),
        };
        item.ok_or_else(|| self.throw("std.ArrayIndexOutOfBoundsException", index.to_string()))
    }

    /// Array store with bounds check
    pub fn array_set(&mut self, array: &Value, index: i32, value: Value) -> Result<(), Unwind> {
        let id = self.non_null(array, "array store")?;
        let stored = match &mut self.machine.heap_mut().get_mut(id)?.kind {
            ObjectKind::Array { items, .. } => match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => return Err(self.throw("std.ClassCastException", "not an array")),
        };
        if stored {
            Ok(())
        } else {
            Err(self.throw("std.ArrayIndexOutOfBoundsException", index.to_string()))
        }
    }

    // ---------------------------------------------------------------------
    // Host internals used by built-in natives
    // ---------------------------------------------------------------------

    pub(crate) fn kind(&self, object: ObjectId) -> Result<&ObjectKind, Unwind> {
        Ok(self.machine.kind(object)?)
    }

    pub(crate) fn kind_mut(&mut self, object: ObjectId) -> Result<&mut ObjectKind, Unwind> {
        Ok(&mut self.machine.heap_mut().get_mut(object)?.kind)
    }

    pub(crate) fn receiver(&mut self, receiver: Option<Value>) -> Result<ObjectId, Unwind> {
        let value = receiver.unwrap_or(Value::Null);
        self.non_null(&value, "instance call")
    }

    pub(crate) fn alloc_builtin(&mut self, class: &str, kind: ObjectKind) -> Value {
        let id = self.machine.heap_mut().alloc(super::heap::HeapObject {
            class: ClassId::new(class),
            kind,
        });
        Value::Ref(id)
    }

    pub(crate) fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.machine.values_equal(a, b)
    }

    pub(crate) fn machine(&mut self) -> &mut Machine {
        self.machine
    }
}
