//! Object to model conversion.

use super::cache::IdentityCache;
use super::custom::{CustomConstructors, CustomModelConstructor, ObjectView};
use super::ExpansionStrategy;
use crate::model::{
    ArrayModel, AssembleModel, ClassId, CompositeModel, Handle, LambdaModel, MethodRef, Model,
    PrimitiveValue,
};
use crate::result::{ExecError, ExecResult};
use crate::runtime::{Introspection, ObjectId, ObjectKind, Value, LAMBDA_CLASS_MARKER};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Builds value models from live objects.
///
/// Every object gets a handle from the session's [`IdentityCache`]. The
/// cache is consulted before an object's structure is visited and a
/// provisional model is registered before recursing, so shared objects
/// and cycles come out as references to the first full description.
pub struct ModelConstructor<'a> {
    host: &'a dyn Introspection,
    session: &'a mut IdentityCache,
    customs: &'a CustomConstructors,
    strategy: ExpansionStrategy,
}

impl std::fmt::Debug for ModelConstructor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConstructor")
            .field("strategy", &self.strategy)
            .field("known_objects", &self.session.len())
            .finish()
    }
}

impl<'a> ModelConstructor<'a> {
    /// Create a constructor over one session
    pub fn new(
        host: &'a dyn Introspection,
        session: &'a mut IdentityCache,
        customs: &'a CustomConstructors,
        strategy: ExpansionStrategy,
    ) -> Self {
        Self {
            host,
            session,
            customs,
            strategy,
        }
    }

    /// Mint a handle for a synthetic model with no live object behind it
    pub fn fresh_handle(&mut self) -> Handle {
        self.session.next_handle()
    }

    /// Model of the class reference for `class`, sharing the handle of the
    /// live reference object when there is one
    pub fn class_ref(&mut self, class: &ClassId) -> ExecResult<Model> {
        match self.host.known_class_ref(class) {
            Some(object) => self.construct_object(object, 0),
            None => Ok(Model::ClassRef {
                id: self.fresh_handle(),
                value: class.clone(),
            }),
        }
    }

    /// Model of `value` as seen through `declared`, expanding composites
    /// at most `depth` levels deep
    pub fn construct(&mut self, value: &Value, declared: &ClassId, depth: u32) -> ExecResult<Model> {
        match value {
            Value::Null => Ok(Model::Null(declared.clone())),
            Value::Void => Ok(Model::Void),
            Value::Prim(p) => Ok(Model::Primitive(p.clone())),
            Value::Ref(object) => self.construct_object(*object, depth),
        }
    }

    /// Mock model of an object from its recorded calls, without walking
    /// its fields
    pub fn construct_mock(
        &mut self,
        object: ObjectId,
        declared: &ClassId,
        recorded: BTreeMap<MethodRef, Vec<Model>>,
    ) -> ExecResult<Model> {
        let handle = self.session.handle_for(object);
        let mut composite = CompositeModel::new(Some(handle), declared.clone()).with_mock(true);
        composite.mocks = recorded;
        let model = Model::Composite(composite);
        self.session.cache_model(handle, model.clone());
        Ok(model)
    }

    fn construct_object(&mut self, object: ObjectId, depth: u32) -> ExecResult<Model> {
        let known = self.session.handle_of(object).is_some();
        let handle = self.session.handle_for(object);
        if let Some(cached) = self.session.model(handle) {
            return Ok(cached.reference());
        }

        let host = self.host;
        let class = host.class_of(object)?;
        if self.session.is_pending(handle) {
            // re-entered while a custom constructor is still instantiating
            return Ok(CompositeModel::new(Some(handle), class).into());
        }
        let kind = host.kind(object)?;
        match kind {
            ObjectKind::Enum { name, .. } => {
                let model = Model::EnumConstant {
                    id: handle,
                    class_id: class,
                    name: name.clone(),
                };
                self.session.cache_model(handle, model.clone());
                Ok(model)
            }
            ObjectKind::ClassRef { target } => {
                let model = Model::ClassRef {
                    id: handle,
                    value: target.clone(),
                };
                self.session.cache_model(handle, model.clone());
                Ok(model)
            }
            ObjectKind::Array { element, items } => {
                self.construct_array(handle, &class, element, items, depth)
            }
            ObjectKind::Lambda {
                sam,
                declaring,
                method,
                receiver,
                captured,
            } if class.name().contains(LAMBDA_CLASS_MARKER) => {
                let stub = LambdaModel {
                    id: Some(handle),
                    sam_type: sam.clone(),
                    declaring_class: declaring.clone(),
                    synthetic_name: method.clone(),
                    captured_values: Vec::new(),
                };
                self.session.cache_model(handle, Model::Lambda(stub.clone()));
                let object_class = ClassId::new(ClassId::OBJECT);
                let mut captured_values = Vec::with_capacity(captured.len() + 1);
                for value in receiver.iter().chain(captured) {
                    captured_values.push(self.construct(value, &object_class, depth.saturating_sub(1))?);
                }
                let model = Model::Lambda(LambdaModel {
                    captured_values,
                    ..stub
                });
                self.session.cache_model(handle, model.clone());
                Ok(model)
            }
            _ => {
                if let Some(custom) = self.customs.find(&class) {
                    let view = ObjectView {
                        id: object,
                        class: &class,
                        kind,
                        depth,
                    };
                    match self.construct_custom(handle, custom.as_ref(), &view) {
                        Ok(model) => return Ok(model),
                        Err(err @ ExecError::StreamConsumed { .. }) => {
                            self.session.end(handle);
                            return Err(err);
                        }
                        Err(err) => {
                            debug!(class = %class, error = %err, "custom constructor failed, using composite");
                            self.session.end(handle);
                            self.session.discard_model(handle);
                        }
                    }
                }
                self.construct_composite(handle, object, class, known, depth)
            }
        }
    }

    fn construct_custom(
        &mut self,
        handle: Handle,
        custom: &dyn CustomModelConstructor,
        view: &ObjectView<'_>,
    ) -> ExecResult<Model> {
        self.session.begin(handle);
        let instantiation = custom.instantiation(self, view)?;
        self.session.end(handle);

        let mut assemble = AssembleModel {
            id: Some(handle),
            class_id: view.class.clone(),
            display_name: custom.display_name(view.class),
            instantiation,
            modifications: Vec::new(),
        };
        let provisional = Model::Assemble(assemble.clone());
        self.session.cache_model(handle, provisional.clone());

        assemble.modifications = custom.modifications(self, &provisional.reference(), view)?;
        let model = Model::Assemble(assemble);
        self.session.cache_model(handle, model.clone());
        trace!(handle = %handle, class = %view.class, "assembled");
        Ok(model)
    }

    fn should_expand(&self, class: &ClassId, known: bool) -> bool {
        match self.strategy {
            ExpansionStrategy::Always => true,
            ExpansionStrategy::UserClassesOrCached => known || self.host.is_user_class(class),
        }
    }

    fn construct_composite(
        &mut self,
        handle: Handle,
        object: ObjectId,
        class: ClassId,
        known: bool,
        depth: u32,
    ) -> ExecResult<Model> {
        let is_mock = self.session.is_mock(object);
        let mut composite = CompositeModel::new(Some(handle), class.clone()).with_mock(is_mock);
        self.session.cache_model(handle, Model::Composite(composite.clone()));

        if depth > 0 && self.should_expand(&class, known) {
            for info in self.host.instance_fields(&class)? {
                let value = self.host.get_field(object, &info.field)?;
                let model = self.construct(&value, &info.class_id, depth - 1)?;
                composite.fields.insert(info.field, model);
            }
        }
        if let Some(recorded) = self.session.recorded_calls(object) {
            composite.mocks = recorded.clone();
        }

        let model = Model::Composite(composite);
        self.session.cache_model(handle, model.clone());
        Ok(model)
    }

    fn construct_array(
        &mut self,
        handle: Handle,
        class: &ClassId,
        element: &ClassId,
        items: &[Value],
        depth: u32,
    ) -> ExecResult<Model> {
        let fill = if element.is_primitive() {
            most_frequent(element, items)
        } else {
            Value::Null
        };
        let default_fill = self.construct(&fill, element, 0)?;
        let mut array = ArrayModel {
            id: Some(handle),
            class_id: class.clone(),
            length: items.len(),
            default_fill: Box::new(default_fill),
            overrides: BTreeMap::new(),
        };
        self.session.cache_model(handle, Model::Array(array.clone()));

        for (index, item) in items.iter().enumerate() {
            if *item != fill {
                let model = self.construct(item, element, depth.saturating_sub(1))?;
                array.overrides.insert(index, model);
            }
        }
        let model = Model::Array(array);
        self.session.cache_model(handle, model.clone());
        Ok(model)
    }
}

/// Most frequent element of a primitive array; ties go to the type default
fn most_frequent(element: &ClassId, items: &[Value]) -> Value {
    let default = PrimitiveValue::default_for(element).map_or(Value::Null, Value::Prim);
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(value, _)| *value == item) {
            Some((_, count)) => *count += 1,
            None => counts.push((item, 1)),
        }
    }
    let default_count = counts
        .iter()
        .find(|(value, _)| **value == default)
        .map_or(0, |(_, count)| *count);
    let best = counts.iter().copied().max_by(|a, b| a.1.cmp(&b.1).then(std::cmp::Ordering::Greater));
    match best {
        Some((value, count)) if count > default_count => value.clone(),
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_most_frequent_prefers_majority() {
        let items = [Value::int(3), Value::int(3), Value::int(0)];
        assert_eq!(most_frequent(&ClassId::new("int"), &items), Value::int(3));
    }

    #[test]
    fn test_most_frequent_tie_goes_to_default() {
        let items = [Value::int(3), Value::int(0)];
        assert_eq!(most_frequent(&ClassId::new("int"), &items), Value::int(0));
        assert_eq!(most_frequent(&ClassId::new("int"), &[]), Value::int(0));
    }

    #[test]
    fn test_most_frequent_first_of_equal_non_defaults() {
        let items = [Value::int(4), Value::int(5), Value::int(5), Value::int(4)];
        assert_eq!(most_frequent(&ClassId::new("int"), &items), Value::int(4));
    }
}
