//! Per-session identity cache shared by both constructors.

use crate::model::{EnvironmentModels, Handle, MethodRef, Model};
use crate::runtime::ObjectId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Monotonic handle source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleGenerator {
    next: u32,
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl HandleGenerator {
    /// Generator starting at handle 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator whose first handle is larger than `max`
    #[must_use]
    pub fn after(max: Option<Handle>) -> Self {
        Self {
            next: max.map_or(1, |h| h.as_u32().saturating_add(1)),
        }
    }

    /// Mint the next handle
    pub fn next_handle(&mut self) -> Handle {
        let handle = Handle::new(self.next);
        self.next = self.next.saturating_add(1);
        handle
    }

    /// Handle the next call will return
    #[must_use]
    pub const fn peek(&self) -> Handle {
        Handle::new(self.next)
    }
}

/// Identity side tables of one session.
///
/// Shared by the value constructor (model to object) and the model
/// constructor (object to model) within a single invocation, so that an
/// unmodified object maps back to the handle it was built from. Host
/// object ids are recycled between invocations; a cache must never
/// outlive the invocation it was created for.
#[derive(Debug, Default)]
pub struct IdentityCache {
    generator: HandleGenerator,
    handles: HashMap<ObjectId, Handle>,
    objects: HashMap<Handle, ObjectId>,
    models: HashMap<Handle, Model>,
    pending: HashSet<Handle>,
    mocks: HashMap<ObjectId, BTreeMap<MethodRef, Vec<Model>>>,
}

impl IdentityCache {
    /// Empty cache minting handles from 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cache minting handles above every handle in `state`
    #[must_use]
    pub fn for_state(state: &EnvironmentModels) -> Self {
        Self {
            generator: HandleGenerator::after(state.max_handle()),
            ..Self::default()
        }
    }

    /// Mint a handle not bound to any object
    pub fn next_handle(&mut self) -> Handle {
        self.generator.next_handle()
    }

    /// Handle already assigned to an object
    #[must_use]
    pub fn handle_of(&self, object: ObjectId) -> Option<Handle> {
        self.handles.get(&object).copied()
    }

    /// Object built for a handle
    #[must_use]
    pub fn object_of(&self, handle: Handle) -> Option<ObjectId> {
        self.objects.get(&handle).copied()
    }

    /// Record that `handle` denotes `object`. The first handle bound to an
    /// object stays its handle.
    pub fn bind(&mut self, handle: Handle, object: ObjectId) {
        self.objects.insert(handle, object);
        self.handles.entry(object).or_insert(handle);
    }

    /// Handle of an object, minting one on first sight
    pub fn handle_for(&mut self, object: ObjectId) -> Handle {
        if let Some(handle) = self.handles.get(&object) {
            return *handle;
        }
        let handle = self.generator.next_handle();
        self.bind(handle, object);
        handle
    }

    /// Model already produced for a handle, complete or provisional
    #[must_use]
    pub fn model(&self, handle: Handle) -> Option<&Model> {
        self.models.get(&handle)
    }

    /// Register a model; replaces a provisional entry
    pub fn cache_model(&mut self, handle: Handle, model: Model) {
        self.models.insert(handle, model);
    }

    /// Drop a (partially built) model
    pub fn discard_model(&mut self, handle: Handle) {
        self.models.remove(&handle);
    }

    /// Mark a handle as being built by a custom constructor
    pub(crate) fn begin(&mut self, handle: Handle) {
        self.pending.insert(handle);
    }

    pub(crate) fn end(&mut self, handle: Handle) {
        self.pending.remove(&handle);
    }

    pub(crate) fn is_pending(&self, handle: Handle) -> bool {
        self.pending.contains(&handle)
    }

    /// Record that `object` was built from a mock model
    pub fn mark_mock(&mut self, object: ObjectId, recorded: BTreeMap<MethodRef, Vec<Model>>) {
        self.mocks.insert(object, recorded);
    }

    /// Whether `object` was built from a mock model
    #[must_use]
    pub fn is_mock(&self, object: ObjectId) -> bool {
        self.mocks.contains_key(&object)
    }

    /// Recorded calls of a mock object
    #[must_use]
    pub fn recorded_calls(&self, object: ObjectId) -> Option<&BTreeMap<MethodRef, Vec<Model>>> {
        self.mocks.get(&object)
    }

    /// Number of objects with a handle
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no object has a handle yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{ClassId, CompositeModel};
    use proptest::prelude::*;

    #[test]
    fn test_generator_after_state() {
        let state = EnvironmentModels::new(
            Some(Model::Composite(CompositeModel::new(
                Some(Handle::new(41)),
                ClassId::new("samples.Node"),
            ))),
            vec![Model::int(1)],
        );
        let mut cache = IdentityCache::for_state(&state);
        assert_eq!(cache.next_handle(), Handle::new(42));
        assert_eq!(IdentityCache::new().next_handle(), Handle::new(1));
    }

    #[test]
    fn test_first_binding_wins() {
        let mut cache = IdentityCache::new();
        let object = ObjectId::new(3);
        cache.bind(Handle::new(5), object);
        cache.bind(Handle::new(9), object);
        assert_eq!(cache.handle_of(object), Some(Handle::new(5)));
        assert_eq!(cache.object_of(Handle::new(9)), Some(object));
        assert_eq!(cache.handle_for(object), Handle::new(5));
    }

    #[test]
    fn test_handle_for_mints_once() {
        let mut cache = IdentityCache::new();
        let a = cache.handle_for(ObjectId::new(1));
        let b = cache.handle_for(ObjectId::new(2));
        assert_ne!(a, b);
        assert_eq!(cache.handle_for(ObjectId::new(1)), a);
        assert_eq!(cache.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_minted_handles_exceed_state(max in 0u32..1_000_000, count in 1usize..50) {
            let mut generator = HandleGenerator::after(Some(Handle::new(max)));
            let mut previous = Handle::new(max);
            for _ in 0..count {
                let next = generator.next_handle();
                prop_assert!(next > previous);
                previous = next;
            }
        }
    }
}
