//! Registry of installed mock answers.

use crate::model::{ClassId, MethodRef};
use crate::runtime::{ObjectId, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::trace;

/// Identifier of one installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(u64);

impl ControllerId {
    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock-{}", self.0)
    }
}

/// Instance mocks key on object identity and the method signature, so an
/// override declared in a subclass still hits. Static mocks key on the
/// exact declaring method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MethodKey {
    Instance(ObjectId, String),
    Static(MethodRef),
}

impl MethodKey {
    fn of(instance: Option<ObjectId>, method: &MethodRef) -> Self {
        match instance {
            Some(object) => Self::Instance(object, method.signature()),
            None => Self::Static(method.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Method(MethodKey),
    NewInstance(ClassId),
}

/// Handle to one installation; closing it removes exactly what it added
#[derive(Debug, PartialEq, Eq)]
#[must_use = "static and new-instance mocks stay installed until the controller is closed"]
pub struct MockController {
    id: ControllerId,
    target: Target,
}

impl MockController {
    /// Installation identifier
    pub const fn id(&self) -> ControllerId {
        self.id
    }

    /// Whether leaving the controller open would leak into other calls.
    ///
    /// Instance-method mocks only affect their own object and may be left
    /// for the collector; static and new-instance mocks must be closed.
    pub const fn requires_close(&self) -> bool {
        !matches!(self.target, Target::Method(MethodKey::Instance(..)))
    }
}

#[derive(Debug)]
struct MethodEntry {
    controller: ControllerId,
    values: VecDeque<Value>,
}

#[derive(Debug)]
struct NewInstanceEntry {
    controller: ControllerId,
    values: VecDeque<Value>,
    call_sites: BTreeSet<ClassId>,
}

/// Tables of canned return values and fabricated instances.
///
/// Several installations may stack on the same key; the most recent one
/// answers until it is closed.
#[derive(Debug, Default)]
pub struct MockRegistry {
    methods: HashMap<MethodKey, Vec<MethodEntry>>,
    new_instances: HashMap<ClassId, Vec<NewInstanceEntry>>,
    next_controller: u64,
}

impl MockRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> ControllerId {
        self.next_controller += 1;
        ControllerId(self.next_controller)
    }

    /// Queue return values for `method` on `instance`, or on the static
    /// method when `instance` is `None`
    pub fn register_method_mock(
        &mut self,
        instance: Option<ObjectId>,
        method: &MethodRef,
        values: Vec<Value>,
    ) -> MockController {
        let id = self.mint();
        let key = MethodKey::of(instance, method);
        trace!(controller = %id, method = %method, values = values.len(), "method mock installed");
        self.methods.entry(key.clone()).or_default().push(MethodEntry {
            controller: id,
            values: values.into(),
        });
        MockController {
            id,
            target: Target::Method(key),
        }
    }

    /// Queue fabricated instances of `class` for allocations made from
    /// one of `call_sites`
    pub fn register_new_instance_mock(
        &mut self,
        class: ClassId,
        values: Vec<Value>,
        call_sites: BTreeSet<ClassId>,
    ) -> MockController {
        let id = self.mint();
        trace!(controller = %id, class = %class, values = values.len(), "new-instance mock installed");
        self.new_instances
            .entry(class.clone())
            .or_default()
            .push(NewInstanceEntry {
                controller: id,
                values: values.into(),
                call_sites,
            });
        MockController {
            id,
            target: Target::NewInstance(class),
        }
    }

    /// Whether a mock is installed for the key, exhausted or not
    #[must_use]
    pub fn is_mocked(&self, instance: Option<ObjectId>, method: &MethodRef) -> bool {
        self.methods.contains_key(&MethodKey::of(instance, method))
    }

    /// Whether the next call would be answered from a queue
    #[must_use]
    pub fn has_next(&self, instance: Option<ObjectId>, method: &MethodRef) -> bool {
        self.methods
            .get(&MethodKey::of(instance, method))
            .and_then(|stack| stack.last())
            .is_some_and(|entry| !entry.values.is_empty())
    }

    /// Consume the next queued value
    pub fn next_value(&mut self, instance: Option<ObjectId>, method: &MethodRef) -> Option<Value> {
        self.methods
            .get_mut(&MethodKey::of(instance, method))
            .and_then(|stack| stack.last_mut())
            .and_then(|entry| entry.values.pop_front())
    }

    /// Whether any instance mock targets `object`
    #[must_use]
    pub fn is_mock_object(&self, object: ObjectId) -> bool {
        self.methods
            .keys()
            .any(|key| matches!(key, MethodKey::Instance(o, _) if *o == object))
    }

    /// Fabricated instance for an allocation of `class` made from
    /// `call_site`, if one is queued and the site is allowed
    pub fn next_new_instance(&mut self, class: &ClassId, call_site: &ClassId) -> Option<Value> {
        let entry = self.new_instances.get_mut(class)?.last_mut()?;
        if !entry.call_sites.contains(call_site) {
            return None;
        }
        entry.values.pop_front()
    }

    /// Remove exactly the entries installed under `controller`
    pub fn close(&mut self, controller: MockController) -> bool {
        let removed = match &controller.target {
            Target::Method(key) => remove_entry(&mut self.methods, key, |e| e.controller == controller.id),
            Target::NewInstance(class) => {
                remove_entry(&mut self.new_instances, class, |e| e.controller == controller.id)
            }
        };
        trace!(controller = %controller.id, removed, "mock controller closed");
        removed
    }

    /// Values still queued; they must survive collection while installed
    pub fn queued_values(&self) -> impl Iterator<Item = &Value> {
        let methods = self.methods.values().flatten().flat_map(|e| e.values.iter());
        let instances = self
            .new_instances
            .values()
            .flatten()
            .flat_map(|e| e.values.iter());
        methods.chain(instances)
    }

    /// Whether nothing is installed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.new_instances.is_empty()
    }

    /// Drop every installation
    pub fn clear(&mut self) {
        self.methods.clear();
        self.new_instances.clear();
    }
}

fn remove_entry<K, E>(
    table: &mut HashMap<K, Vec<E>>,
    key: &K,
    matches: impl Fn(&E) -> bool,
) -> bool
where
    K: std::hash::Hash + Eq,
{
    let Some(stack) = table.get_mut(key) else {
        return false;
    };
    let before = stack.len();
    stack.retain(|entry| !matches(entry));
    let removed = stack.len() != before;
    if stack.is_empty() {
        table.remove(key);
    }
    removed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn method(name: &str) -> MethodRef {
        MethodRef::new("samples.Service", name, vec![], "int")
    }

    mod method_mock_tests {
        use super::*;

        #[test]
        fn test_queue_in_order_then_exhausted() {
            let mut registry = MockRegistry::new();
            let object = ObjectId::new(1);
            let _ctl = registry.register_method_mock(
                Some(object),
                &method("m"),
                vec![Value::int(10), Value::int(20)],
            );
            assert_eq!(registry.next_value(Some(object), &method("m")), Some(Value::int(10)));
            assert_eq!(registry.next_value(Some(object), &method("m")), Some(Value::int(20)));
            assert!(!registry.has_next(Some(object), &method("m")));
            assert!(registry.is_mocked(Some(object), &method("m")));
            assert_eq!(registry.next_value(Some(object), &method("m")), None);
        }

        #[test]
        fn test_instance_keys_use_identity() {
            let mut registry = MockRegistry::new();
            let _ctl = registry.register_method_mock(Some(ObjectId::new(1)), &method("m"), vec![Value::int(1)]);
            assert!(!registry.has_next(Some(ObjectId::new(2)), &method("m")));
            assert!(!registry.has_next(None, &method("m")));
            assert!(registry.is_mock_object(ObjectId::new(1)));
            assert!(!registry.is_mock_object(ObjectId::new(2)));
        }

        #[test]
        fn test_instance_key_ignores_declaring_class() {
            let mut registry = MockRegistry::new();
            let declared = MethodRef::new("samples.Base", "m", vec![], "int");
            let _ctl = registry.register_method_mock(Some(ObjectId::new(1)), &declared, vec![Value::int(5)]);
            let resolved = MethodRef::new("samples.Derived", "m", vec![], "int");
            assert_eq!(registry.next_value(Some(ObjectId::new(1)), &resolved), Some(Value::int(5)));
        }

        #[test]
        fn test_close_removes_only_own_entries() {
            let mut registry = MockRegistry::new();
            let first = registry.register_method_mock(None, &method("s"), vec![Value::int(1)]);
            let second = registry.register_method_mock(None, &method("s"), vec![Value::int(2)]);
            assert!(first.requires_close());

            assert!(registry.close(second));
            assert_eq!(registry.next_value(None, &method("s")), Some(Value::int(1)));
            assert!(registry.close(first));
            assert!(registry.is_empty());
        }

        #[test]
        fn test_instance_controller_may_stay_open() {
            let mut registry = MockRegistry::new();
            let ctl = registry.register_method_mock(Some(ObjectId::new(3)), &method("m"), vec![]);
            assert!(!ctl.requires_close());
            assert!(registry.close(ctl));
        }
    }

    mod new_instance_tests {
        use super::*;

        #[test]
        fn test_call_site_restriction() {
            let mut registry = MockRegistry::new();
            let class = ClassId::new("samples.Engine");
            let _ctl = registry.register_new_instance_mock(
                class.clone(),
                vec![Value::Ref(ObjectId::new(9))],
                BTreeSet::from([ClassId::new("samples.CarA")]),
            );
            assert_eq!(registry.next_new_instance(&class, &ClassId::new("samples.CarB")), None);
            assert_eq!(
                registry.next_new_instance(&class, &ClassId::new("samples.CarA")),
                Some(Value::Ref(ObjectId::new(9)))
            );
            assert_eq!(registry.next_new_instance(&class, &ClassId::new("samples.CarA")), None);
        }

        #[test]
        fn test_queued_values_are_reported() {
            let mut registry = MockRegistry::new();
            let _a = registry.register_new_instance_mock(
                ClassId::new("samples.Engine"),
                vec![Value::Ref(ObjectId::new(1))],
                BTreeSet::new(),
            );
            let _b = registry.register_method_mock(None, &method("s"), vec![Value::Ref(ObjectId::new(2))]);
            assert_eq!(registry.queued_values().count(), 2);
            registry.clear();
            assert!(registry.is_empty());
        }
    }
}
