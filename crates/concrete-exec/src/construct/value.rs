//! Model to object conversion.

use super::cache::IdentityCache;
use crate::mock::{MockController, MockRegistry};
use crate::model::{
    ArrayModel, AssembleModel, ClassId, CompositeModel, EnvironmentModels, ExecutableCall,
    FieldRef, Handle, Instrumentation, LambdaModel, MethodRef, Model, StatementModel,
};
use crate::result::{ExecError, ExecResult};
use crate::runtime::{Introspection, LambdaSpec, ObjectId, Unwind, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

/// Mock installation requested while building values.
///
/// Building never touches the mock registry; the orchestrator installs
/// these once every value exists.
#[derive(Debug, Clone, PartialEq)]
pub enum MockInstallation {
    /// Canned return values for a method on one instance, or for a static
    /// method when `instance` is `None`
    Method {
        /// Mocked receiver
        instance: Option<ObjectId>,
        /// Mocked method
        method: MethodRef,
        /// Return values, in order
        values: Vec<Value>,
    },
    /// Fabricated instances for allocations made from `call_sites`
    NewInstance {
        /// Class whose allocations are replaced
        class: ClassId,
        /// Instances handed out, in order
        values: Vec<Value>,
        /// Classes whose allocations are intercepted
        call_sites: BTreeSet<ClassId>,
    },
}

impl MockInstallation {
    /// Install into `registry`; the controller undoes it
    pub fn install(self, registry: &mut MockRegistry) -> MockController {
        match self {
            Self::Method {
                instance,
                method,
                values,
            } => registry.register_method_mock(instance, &method, values),
            Self::NewInstance {
                class,
                values,
                call_sites,
            } => registry.register_new_instance_mock(class, values, call_sites),
        }
    }
}

/// Live values built from an environment snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltState {
    /// Receiver, absent for static methods and constructors
    pub this_instance: Option<Value>,
    /// Arguments in declaration order
    pub parameters: Vec<Value>,
    /// Static fields to install before the call
    pub statics: Vec<(FieldRef, Value)>,
}

/// Result of building a sub-value: either ready, or the handle of an
/// object whose instantiation call has not returned yet
#[derive(Debug)]
enum Slot {
    Ready(Value),
    Pending(Handle),
}

/// Where a value goes once it exists
#[derive(Debug)]
enum Place {
    Field(ObjectId, FieldRef),
    Element(ObjectId, usize),
}

/// A write held back until `handle` is bound
#[derive(Debug)]
struct DeferredWrite {
    handle: Handle,
    place: Place,
}

/// Builds live objects from value models.
///
/// Models that share a handle build one object. When the same handle
/// appears several times, the description with the most structure is the
/// one that gets built; the others are references to it.
///
/// Assemble and lambda models only get their object once the creating call
/// returns. Until then their handle is pending, and any field or element
/// that refers back to it is written after the object is bound.
pub struct ValueConstructor<'a> {
    host: &'a mut dyn Introspection,
    session: &'a mut IdentityCache,
    richest: HashMap<Handle, Model>,
    effects: Vec<MockInstallation>,
    pending: HashSet<Handle>,
    deferred: Vec<DeferredWrite>,
}

impl std::fmt::Debug for ValueConstructor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueConstructor")
            .field("indexed", &self.richest.len())
            .field("effects", &self.effects.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn unwind_to_error(host: &dyn Introspection, unwind: Unwind, what: &str) -> ExecError {
    match unwind {
        Unwind::Sandbox(message) => ExecError::sandbox(message),
        Unwind::MockResolution(message) => ExecError::mock_resolution(message),
        Unwind::Host(err) => err,
        Unwind::Interrupted => ExecError::construction(format!("{what} was interrupted")),
        Unwind::Exception(object) => {
            let class = host
                .class_of(object)
                .map_or_else(|_| "unknown exception".to_string(), |c| c.to_string());
            ExecError::construction(format!("{what} threw {class}"))
        }
    }
}

impl<'a> ValueConstructor<'a> {
    /// Create a constructor over one session
    pub fn new(host: &'a mut dyn Introspection, session: &'a mut IdentityCache) -> Self {
        Self {
            host,
            session,
            richest: HashMap::new(),
            effects: Vec::new(),
            pending: HashSet::new(),
            deferred: Vec::new(),
        }
    }

    /// Remember the fullest description of every handle in `models`
    pub fn index<'m>(&mut self, models: impl IntoIterator<Item = &'m Model>) {
        for model in models {
            model.walk(&mut |m| {
                let Some(handle) = m.id() else {
                    return;
                };
                let richer = self
                    .richest
                    .get(&handle)
                    .map_or(true, |known| m.richness() > known.richness());
                if richer {
                    self.richest.insert(handle, m.clone());
                }
            });
        }
    }

    /// Build receiver, parameters and statics of a snapshot
    pub fn construct_state(&mut self, state: &EnvironmentModels) -> ExecResult<BuiltState> {
        self.index(state.models());
        let this_instance = state
            .this_instance
            .as_ref()
            .map(|m| self.construct(m))
            .transpose()?;
        let parameters = state
            .parameters
            .iter()
            .map(|m| self.construct(m))
            .collect::<ExecResult<Vec<_>>>()?;
        let statics = state
            .statics
            .iter()
            .map(|(field, m)| Ok((field.clone(), self.construct(m)?)))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(BuiltState {
            this_instance,
            parameters,
            statics,
        })
    }

    /// Build the values of mocking instructions and queue their installation
    pub fn construct_instrumentation(&mut self, instrumentation: &[Instrumentation]) -> ExecResult<()> {
        for item in instrumentation {
            match item {
                Instrumentation::StaticMethod { method, values } => {
                    self.index(values);
                    let values = self.construct_all(values)?;
                    self.effects.push(MockInstallation::Method {
                        instance: None,
                        method: method.clone(),
                        values,
                    });
                }
                Instrumentation::NewInstance {
                    class_id,
                    instances,
                    call_sites,
                } => {
                    self.index(instances);
                    let values = self.construct_all(instances)?;
                    self.effects.push(MockInstallation::NewInstance {
                        class: class_id.clone(),
                        values,
                        call_sites: call_sites.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Mock installations requested so far
    pub fn take_effects(&mut self) -> Vec<MockInstallation> {
        std::mem::take(&mut self.effects)
    }

    fn construct_all(&mut self, models: &[Model]) -> ExecResult<Vec<Value>> {
        models.iter().map(|m| self.construct(m)).collect()
    }

    /// Build one value
    pub fn construct(&mut self, model: &Model) -> ExecResult<Value> {
        match self.construct_slot(model)? {
            Slot::Ready(value) => Ok(value),
            Slot::Pending(handle) => Err(ExecError::construction(format!(
                "object {handle} is needed before its instantiation returns"
            ))),
        }
    }

    fn construct_slot(&mut self, model: &Model) -> ExecResult<Slot> {
        if let Some(handle) = model.id() {
            if let Some(object) = self.session.object_of(handle) {
                return Ok(Slot::Ready(Value::Ref(object)));
            }
            if self.pending.contains(&handle) {
                return Ok(Slot::Pending(handle));
            }
            if let Some(richest) = self.richest.get(&handle) {
                if richest.richness() > model.richness() {
                    let richest = richest.clone();
                    return self.construct_fresh(&richest).map(Slot::Ready);
                }
            }
        }
        self.construct_fresh(model).map(Slot::Ready)
    }

    fn construct_fresh(&mut self, model: &Model) -> ExecResult<Value> {
        match model {
            Model::Null(_) => Ok(Value::Null),
            Model::Void => Ok(Value::Void),
            Model::Primitive(p) => Ok(Value::Prim(p.clone())),
            Model::EnumConstant { id, class_id, name } => {
                let object = self.host.enum_constant(class_id, name)?;
                self.session.bind(*id, object);
                Ok(Value::Ref(object))
            }
            Model::ClassRef { id, value } => {
                let object = self.host.class_ref(value)?;
                self.session.bind(*id, object);
                Ok(Value::Ref(object))
            }
            Model::Composite(composite) => self.construct_composite(composite),
            Model::Array(array) => self.construct_array(array),
            Model::Assemble(assemble) => self.construct_assemble(assemble),
            Model::Lambda(lambda) => self.construct_lambda(lambda),
        }
    }

    /// Write `slot` into `place` now, or once its object exists
    fn store(&mut self, place: Place, slot: Slot) -> ExecResult<()> {
        match slot {
            Slot::Ready(value) => self.write(&place, value),
            Slot::Pending(handle) => {
                trace!(handle = %handle, ?place, "write deferred");
                self.deferred.push(DeferredWrite { handle, place });
                Ok(())
            }
        }
    }

    fn write(&mut self, place: &Place, value: Value) -> ExecResult<()> {
        match place {
            Place::Field(object, field) => self.set_field(*object, field, value),
            Place::Element(array, index) => self.host.array_store(*array, *index, value),
        }
    }

    /// Run `create` with `handle` pending, then bind its result and apply
    /// the writes that waited for it
    fn construct_pending(
        &mut self,
        handle: Option<Handle>,
        create: impl FnOnce(&mut Self) -> ExecResult<Value>,
    ) -> ExecResult<Value> {
        let Some(handle) = handle else {
            return create(self);
        };
        self.pending.insert(handle);
        let created = create(self);
        self.pending.remove(&handle);
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|write| write.handle == handle);
        self.deferred = waiting;
        let value = created?;
        if let Some(object) = value.object() {
            self.session.bind(handle, object);
        }
        for write in ready {
            self.write(&write.place, value.clone())?;
        }
        Ok(value)
    }

    fn construct_composite(&mut self, model: &CompositeModel) -> ExecResult<Value> {
        self.host.ensure_loaded(&model.class_id)?;
        let object = self.host.allocate_uninit(&model.class_id)?;
        if let Some(handle) = model.id {
            self.session.bind(handle, object);
        }
        trace!(class = %model.class_id, object = %object, mock = model.is_mock, "composite allocated");

        for (field, sub) in &model.fields {
            let slot = self.construct_slot(sub)?;
            self.store(Place::Field(object, field.clone()), slot)?;
        }

        if model.is_mock {
            self.session.mark_mock(object, model.mocks.clone());
            for (method, values) in &model.mocks {
                self.index(values);
                let values = self.construct_all(values)?;
                self.effects.push(MockInstallation::Method {
                    instance: Some(object),
                    method: method.clone(),
                    values,
                });
            }
        }
        Ok(Value::Ref(object))
    }

    /// Write a field with access temporarily granted, then restore access
    fn set_field(&mut self, object: ObjectId, field: &FieldRef, value: Value) -> ExecResult<()> {
        let previous = self.host.set_accessible(field, true)?;
        let written = self.host.set_field(object, field, value);
        self.host.set_accessible(field, previous)?;
        written
    }

    fn construct_array(&mut self, model: &ArrayModel) -> ExecResult<Value> {
        let element = model.element_class();
        let array = self.host.new_array(&element, model.length)?;
        if let Some(handle) = model.id {
            self.session.bind(handle, array);
        }
        let default = crate::model::PrimitiveValue::default_for(&element).map_or(Value::Null, Value::Prim);
        match self.construct_slot(&model.default_fill)? {
            Slot::Ready(fill) if fill == default => {}
            Slot::Ready(fill) => {
                for index in 0..model.length {
                    self.host.array_store(array, index, fill.clone())?;
                }
            }
            Slot::Pending(handle) => {
                for index in (0..model.length).filter(|i| !model.overrides.contains_key(i)) {
                    self.store(Place::Element(array, index), Slot::Pending(handle))?;
                }
            }
        }
        for (index, sub) in &model.overrides {
            if *index >= model.length {
                return Err(ExecError::construction(format!(
                    "override index {index} outside array of length {}",
                    model.length
                )));
            }
            let slot = self.construct_slot(sub)?;
            self.store(Place::Element(array, *index), slot)?;
        }
        Ok(Value::Ref(array))
    }

    fn invoke(&mut self, call: &ExecutableCall) -> ExecResult<Value> {
        let receiver = call
            .instance
            .as_deref()
            .map(|m| self.construct(m))
            .transpose()?;
        let args = self.construct_all(&call.params)?;
        let host: &mut dyn Introspection = &mut *self.host;
        match host.invoke(&call.executable, receiver, &args) {
            Ok(value) => Ok(value),
            Err(unwind) => Err(unwind_to_error(
                host,
                unwind,
                &format!("{}.{}", call.executable.declaring(), call.executable.signature()),
            )),
        }
    }

    fn construct_assemble(&mut self, model: &AssembleModel) -> ExecResult<Value> {
        let value = self.construct_pending(model.id, |this| {
            let value = this.invoke(&model.instantiation)?;
            if value.is_null() {
                return Err(ExecError::construction(format!(
                    "instantiation of {} returned null",
                    model.display_name
                )));
            }
            Ok(value)
        })?;

        for statement in &model.modifications {
            match statement {
                StatementModel::Call(call) => {
                    self.invoke(call)?;
                }
                StatementModel::FieldSet(set) => {
                    let object = self.target_object(&set.instance, "field set", &set.field)?;
                    let slot = self.construct_slot(&set.value)?;
                    self.store(Place::Field(object, set.field.clone()), slot)?;
                }
                StatementModel::FieldGet(get) => {
                    let object = self.target_object(&get.instance, "field get", &get.field)?;
                    let read = self.host.get_field(object, &get.field)?;
                    trace!(field = %get.field, value = ?read, "field read");
                }
            }
        }
        Ok(value)
    }

    fn target_object(&mut self, instance: &Model, what: &str, field: &FieldRef) -> ExecResult<ObjectId> {
        self.construct(instance)?
            .object()
            .ok_or_else(|| ExecError::construction(format!("{what} {field} on a non-object")))
    }

    fn construct_lambda(&mut self, model: &LambdaModel) -> ExecResult<Value> {
        self.host.ensure_loaded(&model.declaring_class)?;
        let is_static = self
            .host
            .is_static_method(&model.declaring_class, &model.synthetic_name)?;
        self.construct_pending(model.id, |this| {
            let mut captured = this.construct_all(&model.captured_values)?;
            let receiver = if is_static || captured.is_empty() {
                None
            } else {
                Some(captured.remove(0))
            };
            let object = this.host.new_lambda(LambdaSpec {
                sam: model.sam_type.clone(),
                declaring: model.declaring_class.clone(),
                method: model.synthetic_name.clone(),
                receiver,
                captured,
            })?;
            Ok(Value::Ref(object))
        })
    }
}
