//! The reference host: class table, heap, statics, and call dispatch.

use super::class::{ClassDef, ClassKind, MethodDef};
use super::frame::{Frame, Unwind};
use super::heap::{Heap, HeapObject, ObjectKind};
use super::introspection::{FieldInfo, Introspection, LambdaSpec};
use super::loader::{ClassPath, ProgramCatalog};
use super::sandbox::{Permission, SandboxPolicy};
use super::value::{ObjectId, Value};
use crate::coverage::{Instrumenter, TraceRecorder};
use crate::mock::MockRegistry;
use crate::model::{
    ClassId, ExecutableRef, FailureCause, FieldRef, MethodRef, PrimitiveValue,
};
use crate::result::{ExecError, ExecResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Field holding an exception's message
pub const THROWABLE_MESSAGE: &str = "message";
/// Root of the exception hierarchy
pub const THROWABLE: &str = "std.Throwable";

/// A method found by resolution, together with the class declaring it
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    class: Arc<ClassDef>,
    index: usize,
}

impl ResolvedMethod {
    /// Method definition
    #[must_use]
    pub fn def(&self) -> &MethodDef {
        &self.class.methods[self.index]
    }

    /// Declaring class
    #[must_use]
    pub fn declaring(&self) -> &ClassId {
        &self.class.name
    }

    /// Reference naming the declaring class
    #[must_use]
    pub fn method_ref(&self) -> MethodRef {
        self.def().method_ref(&self.class.name)
    }

    pub(crate) fn class(&self) -> &Arc<ClassDef> {
        &self.class
    }
}

/// Reference host runtime.
///
/// One machine lives in each worker process. Its heap and statics persist
/// across invocations; object ids are recycled by [`Machine::collect_garbage`].
pub struct Machine {
    catalog: Arc<ProgramCatalog>,
    class_path: ClassPath,
    classes: HashMap<ClassId, Arc<ClassDef>>,
    heap: Heap,
    statics: HashMap<FieldRef, Value>,
    class_refs: HashMap<ClassId, ObjectId>,
    accessible: HashSet<FieldRef>,
    mocks: MockRegistry,
    trace: TraceRecorder,
    instrumenter: Instrumenter,
    policy: SandboxPolicy,
    interrupt: Arc<AtomicBool>,
    synthetic_counter: u32,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("class_path", &self.class_path.entries())
            .field("loaded_classes", &self.classes.len())
            .field("live_objects", &self.heap.live_count())
            .field("statics", &self.statics.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Machine {
    /// Create a machine that can load classes from `catalog`
    #[must_use]
    pub fn new(catalog: Arc<ProgramCatalog>) -> Self {
        Self {
            catalog,
            class_path: ClassPath::new(),
            classes: HashMap::new(),
            heap: Heap::new(),
            statics: HashMap::new(),
            class_refs: HashMap::new(),
            accessible: HashSet::new(),
            mocks: MockRegistry::new(),
            trace: TraceRecorder::default(),
            instrumenter: Instrumenter::new(),
            policy: SandboxPolicy::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
            synthetic_counter: 0,
        }
    }

    // ---------------------------------------------------------------------
    // Class path and loading
    // ---------------------------------------------------------------------

    /// Add catalog entries to the class path
    pub fn add_paths(&mut self, entries: &[String]) -> ExecResult<usize> {
        let catalog = Arc::clone(&self.catalog);
        self.class_path.add_entries(&catalog, entries)
    }

    /// Class path entries added so far
    #[must_use]
    pub fn class_path_entries(&self) -> &[String] {
        self.class_path.entries()
    }

    /// Load every user class on the class path
    pub fn warmup(&mut self) -> ExecResult<usize> {
        let mut names: Vec<ClassId> = self.class_path.user_classes().cloned().collect();
        names.sort();
        for name in &names {
            self.load_class(name)?;
        }
        Ok(names.len())
    }

    /// Load a class, its superclass chain and its interfaces
    pub fn load_class(&mut self, class: &ClassId) -> ExecResult<Arc<ClassDef>> {
        if let Some(loaded) = self.classes.get(class) {
            return Ok(Arc::clone(loaded));
        }
        let def = self
            .class_path
            .find(class)
            .cloned()
            .ok_or_else(|| ExecError::class_not_found(class.name()))?;
        if let Some(superclass) = &def.superclass {
            self.load_class(superclass)?;
        }
        for interface in &def.interfaces {
            self.load_class(interface)?;
        }

        self.instrumenter.instrument(&def);
        let def = Arc::new(def);
        self.classes.insert(class.clone(), Arc::clone(&def));

        for field in def.fields.iter().filter(|f| f.is_static) {
            let value = field
                .initial
                .clone()
                .or_else(|| PrimitiveValue::default_for(&field.class_id))
                .map_or(Value::Null, Value::Prim);
            self.statics.insert(FieldRef::new(class.clone(), &field.name), value);
        }
        if def.kind == ClassKind::Enum {
            for (ordinal, name) in def.enum_constants.iter().enumerate() {
                let id = self.heap.alloc(HeapObject {
                    class: class.clone(),
                    kind: ObjectKind::Enum {
                        name: name.clone(),
                        ordinal: ordinal as u32,
                    },
                });
                self.statics
                    .insert(FieldRef::new(class.clone(), name), Value::Ref(id));
            }
        }
        if let Some(init) = def.static_init.clone() {
            let mut frame = Frame::new(self, Arc::clone(&def), None, 0, None);
            init(&mut frame, None, &[]).map_err(|unwind| {
                ExecError::construction(format!("static initializer of {class} failed: {unwind}"))
            })?;
        }
        debug!(class = %class, "loaded class");
        Ok(def)
    }

    /// Definition of a loaded class
    pub fn class_def(&self, class: &ClassId) -> ExecResult<Arc<ClassDef>> {
        self.classes
            .get(class)
            .cloned()
            .ok_or_else(|| ExecError::class_not_found(class.name()))
    }

    /// Class, its superclasses, then all interfaces reachable from them
    fn ancestors(&self, class: &ClassId) -> Vec<Arc<ClassDef>> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(class).cloned();
        while let Some(def) = current {
            current = def
                .superclass
                .as_ref()
                .and_then(|s| self.classes.get(s).cloned());
            chain.push(def);
        }
        let mut seen: HashSet<ClassId> = chain.iter().map(|c| c.name.clone()).collect();
        let mut pending: Vec<ClassId> = chain.iter().flat_map(|c| c.interfaces.clone()).collect();
        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.classes.get(&name) {
                pending.extend(def.interfaces.iter().cloned());
                chain.push(Arc::clone(def));
            }
        }
        chain
    }

    /// Whether `class` is `ancestor` or inherits from it
    #[must_use]
    pub fn is_assignable(&self, class: &ClassId, ancestor: &ClassId) -> bool {
        class == ancestor || self.ancestors(class).iter().any(|c| &c.name == ancestor)
    }

    fn resolve_where(
        &self,
        class: &ClassId,
        select: impl Fn(&ClassDef) -> Option<usize>,
    ) -> Option<ResolvedMethod> {
        let ancestors = self.ancestors(class);
        // prefer a concrete implementation over an abstract declaration
        let mut declared = None;
        for def in ancestors {
            if let Some(index) = select(&def) {
                let found = ResolvedMethod { class: def, index };
                if !found.def().is_abstract() {
                    return Some(found);
                }
                if declared.is_none() {
                    declared = Some(found);
                }
            }
        }
        declared
    }

    /// Resolve a method by signature, starting at `class`
    pub fn resolve_signature(&self, class: &ClassId, signature: &str) -> ExecResult<ResolvedMethod> {
        self.resolve_where(class, |c| c.method_index(signature))
            .ok_or_else(|| ExecError::executable_not_found(class.name(), signature))
    }

    /// Resolve a method by name and arity, starting at `class`
    pub fn resolve_name(&self, class: &ClassId, name: &str, arity: usize) -> ExecResult<ResolvedMethod> {
        self.resolve_where(class, |c| c.method_index_by_name(name, arity))
            .ok_or_else(|| ExecError::executable_not_found(class.name(), format!("{name}/{arity}")))
    }

    /// Class carrying the mock slot for a static method: the declaring
    /// class or the nearest superclass that has one
    #[must_use]
    pub fn static_mock_slot_owner(&self, method: &MethodRef) -> Option<ClassId> {
        let signature = method.signature();
        let mut current = Some(method.declaring.clone());
        while let Some(class) = current {
            if self
                .instrumenter
                .get(&class)
                .is_some_and(|info| info.has_mock_slot(&signature))
            {
                return Some(class);
            }
            current = self.classes.get(&class).and_then(|c| c.superclass.clone());
        }
        None
    }

    // ---------------------------------------------------------------------
    // Shared state
    // ---------------------------------------------------------------------

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Mock registry of this machine
    #[must_use]
    pub fn mocks(&self) -> &MockRegistry {
        &self.mocks
    }

    /// Mock registry of this machine
    pub fn mocks_mut(&mut self) -> &mut MockRegistry {
        &mut self.mocks
    }

    /// Instruction trace of the current invocation
    #[must_use]
    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    /// Instruction trace of the current invocation
    pub fn trace_mut(&mut self) -> &mut TraceRecorder {
        &mut self.trace
    }

    /// Class instrumentation and accumulated coverage
    #[must_use]
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    /// Fold the current trace into accumulated coverage
    pub(crate) fn accumulate_trace(&mut self) {
        self.instrumenter.accumulate(self.trace.entries());
    }

    /// Replace the sandbox policy
    pub fn set_policy(&mut self, policy: SandboxPolicy) {
        self.policy = policy;
    }

    /// Current sandbox policy
    #[must_use]
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Flag that makes running code unwind at its next instruction
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Clear a pending interrupt
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    /// Free objects unreachable from statics, class references and queued
    /// mock values
    pub fn collect_garbage(&mut self) -> usize {
        let roots: Vec<ObjectId> = self
            .statics
            .values()
            .chain(self.mocks.queued_values())
            .filter_map(Value::object)
            .chain(self.class_refs.values().copied())
            .collect();
        let freed = self.heap.collect(roots);
        trace!(freed, live = self.heap.live_count(), "collected garbage");
        freed
    }

    /// Number of live heap objects
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }

    pub(crate) fn check_permission(&self, permission: Permission) -> Result<(), Unwind> {
        if self.policy.permits(permission) {
            Ok(())
        } else {
            Err(Unwind::Sandbox(format!("{permission} denied by sandbox")))
        }
    }

    // ---------------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------------

    fn next_synthetic(&mut self) -> u32 {
        self.synthetic_counter += 1;
        self.synthetic_counter
    }

    fn fresh_instance(&mut self, class: &ClassId) -> ExecResult<ObjectId> {
        let def = self.load_class(class)?;
        let kind = if def.layout.is_some() {
            def.new_layout()
        } else {
            let mut fields = BTreeMap::new();
            for ancestor in self.ancestors(class) {
                for field in ancestor.fields.iter().filter(|f| !f.is_static) {
                    let value = PrimitiveValue::default_for(&field.class_id).map_or(Value::Null, Value::Prim);
                    fields.insert(FieldRef::new(ancestor.name.clone(), &field.name), value);
                }
            }
            ObjectKind::Instance { fields }
        };
        Ok(self.heap.alloc(HeapObject {
            class: class.clone(),
            kind,
        }))
    }

    /// Allocate and run the constructor matching `signature`, or the one
    /// matching the argument count when no signature is given. Allocations
    /// attributed to `call_site` consult new-instance mocks first.
    pub(crate) fn instantiate(
        &mut self,
        class: &ClassId,
        signature: Option<&str>,
        args: &[Value],
        call_site: Option<&ClassId>,
    ) -> Result<Value, Unwind> {
        if let Some(site) = call_site {
            if let Some(fabricated) = self.mocks.next_new_instance(class, site) {
                trace!(class = %class, site = %site, "allocation served by new-instance mock");
                return Ok(fabricated);
            }
        }
        let def = self.load_class(class)?;
        if def.kind != ClassKind::Class {
            return Err(self.throw_new(
                "std.InstantiationException",
                &format!("cannot instantiate {class}"),
            ));
        }
        let object = self.fresh_instance(class)?;
        let index = match signature {
            Some(sig) => def.method_index(sig),
            None => def.method_index_by_name(crate::model::ConstructorRef::NAME, args.len()),
        };
        match index {
            Some(index) => {
                let ctor = ResolvedMethod { class: def, index };
                self.call(&ctor, Some(Value::Ref(object)), args)?;
            }
            None if args.is_empty() && signature.map_or(true, |s| s == "<init>()void") => {}
            None => {
                return Err(Unwind::Host(ExecError::executable_not_found(
                    class.name(),
                    signature.unwrap_or("<init>"),
                )))
            }
        }
        Ok(Value::Ref(object))
    }

    /// Create an exception object and return the unwind that throws it
    pub(crate) fn throw_new(&mut self, class: &str, message: &str) -> Unwind {
        let class = ClassId::new(class);
        match self.fresh_instance(&class) {
            Ok(object) => {
                let field = FieldRef::new(THROWABLE, THROWABLE_MESSAGE);
                if let Ok(HeapObject {
                    kind: ObjectKind::Instance { fields },
                    ..
                }) = self.heap.get_mut(object)
                {
                    fields.insert(field, Value::string(message));
                }
                Unwind::Exception(object)
            }
            Err(err) => Unwind::Host(err),
        }
    }

    /// Class and message of a thrown object
    #[must_use]
    pub fn describe_exception(&self, object: ObjectId) -> FailureCause {
        match self.heap.get(object) {
            Ok(HeapObject { class, kind }) => {
                let message = match kind {
                    ObjectKind::Instance { fields } => fields
                        .get(&FieldRef::new(THROWABLE, THROWABLE_MESSAGE))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    _ => String::new(),
                };
                FailureCause::new(class.clone(), message)
            }
            Err(err) => FailureCause::new("$Unknown", err.to_string()),
        }
    }

    /// Equality used by sets and maps: primitives and boxed values by
    /// value, everything else by identity
    #[must_use]
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        if a == b {
            return true;
        }
        match (a.object(), b.object()) {
            (Some(x), Some(y)) => match (self.heap.get(x), self.heap.get(y)) {
                (Ok(ox), Ok(oy)) => match (&ox.kind, &oy.kind) {
                    (ObjectKind::Boxed(px), ObjectKind::Boxed(py)) => px == py,
                    (ObjectKind::Uuid { .. }, ObjectKind::Uuid { .. })
                    | (ObjectKind::Locale(_), ObjectKind::Locale(_))
                    | (ObjectKind::LocalDate { .. }, ObjectKind::LocalDate { .. }) => ox.kind == oy.kind,
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        }
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    /// Run a resolved method. Mocks are consulted before the real body.
    pub(crate) fn call(
        &mut self,
        target: &ResolvedMethod,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let def = target.def();
        if args.len() != def.params.len() {
            return Err(Unwind::Host(ExecError::construction(format!(
                "{} expects {} arguments, got {}",
                target.method_ref(),
                def.params.len(),
                args.len()
            ))));
        }
        let method_ref = target.method_ref();
        let mock_object = receiver.as_ref().and_then(Value::object);
        match mock_object {
            Some(object) if !def.is_constructor() => {
                if let Some(value) = self.mocks.next_value(Some(object), &method_ref) {
                    return Ok(value);
                }
            }
            None if def.is_static => {
                if let Some(value) = self.mocks.next_value(None, &method_ref) {
                    return Ok(value);
                }
            }
            _ => {}
        }

        let Some(body) = def.body.clone() else {
            if mock_object.is_some_and(|o| self.mocks.is_mock_object(o)) {
                return Err(Unwind::MockResolution(format!(
                    "no queued value and no real implementation for {method_ref}"
                )));
            }
            return Err(self.throw_new("std.AbstractMethodError", &method_ref.to_string()));
        };

        let offset = self
            .instrumenter
            .get(target.declaring())
            .and_then(|info| {
                info.method_offset(&def.signature())
                    .map(|offset| (info.class_index, offset))
            });
        let call_id = if offset.is_some() {
            self.trace.enter_call()
        } else {
            0
        };
        let mut frame = Frame::new(
            self,
            Arc::clone(target.class()),
            Some(target.index),
            call_id,
            offset,
        );
        body(&mut frame, receiver, args)
    }

    /// Virtual call by name on a receiver
    pub(crate) fn call_virtual(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let Some(object) = receiver.object() else {
            return Err(self.null_receiver(name));
        };
        if let Some(result) = self.dispatch_synthetic(object, name, args) {
            return result;
        }
        let class = self.heap.get(object)?.class.clone();
        let resolved = self.resolve_name(&class, name, args.len())?;
        self.call(&resolved, Some(receiver.clone()), args)
    }

    /// Static call by name
    pub(crate) fn call_static(&mut self, class: &ClassId, name: &str, args: &[Value]) -> Result<Value, Unwind> {
        self.load_class(class)?;
        let resolved = self.resolve_name(class, name, args.len())?;
        if !resolved.def().is_static {
            return Err(Unwind::Host(ExecError::executable_not_found(
                class.name(),
                format!("static {name}"),
            )));
        }
        self.call(&resolved, None, args)
    }

    fn null_receiver(&mut self, name: &str) -> Unwind {
        self.throw_new(
            "std.NullPointerException",
            &format!("cannot invoke {name} on null"),
        )
    }

    /// Proxies forward every call to their handler; lambdas run their
    /// synthetic method with captured values prepended.
    fn dispatch_synthetic(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[Value],
    ) -> Option<Result<Value, Unwind>> {
        let kind = &self.heap.get(object).ok()?.kind;
        match kind {
            ObjectKind::Lambda {
                declaring,
                method,
                receiver,
                captured,
                ..
            } => {
                let (declaring, method, receiver) = (declaring.clone(), method.clone(), receiver.clone());
                let mut all_args = captured.clone();
                all_args.extend_from_slice(args);
                Some(self.call_lambda(&declaring, &method, receiver, &all_args))
            }
            ObjectKind::Proxy { handler, .. } => {
                let handler = handler.clone();
                Some(self.call_proxy(object, &handler, name, args))
            }
            _ => None,
        }
    }

    fn call_lambda(
        &mut self,
        declaring: &ClassId,
        method: &str,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let resolved = self.resolve_name(declaring, method, args.len())?;
        self.call(&resolved, receiver, args)
    }

    fn call_proxy(
        &mut self,
        proxy: ObjectId,
        handler: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let array = self.new_array(&ClassId::new(ClassId::OBJECT), args.len())?;
        if let ObjectKind::Array { items, .. } = &mut self.heap.get_mut(array)?.kind {
            items.clone_from_slice(args);
        }
        self.call_virtual(
            handler,
            "invoke",
            &[Value::Ref(proxy), Value::string(name), Value::Ref(array)],
        )
    }

    /// Invoke the target of an execution: a method by exact signature or a
    /// constructor
    pub fn invoke_executable(
        &mut self,
        executable: &ExecutableRef,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        match executable {
            ExecutableRef::Constructor(ctor) => {
                self.instantiate(&ctor.class, Some(&ctor.signature()), args, None)
            }
            ExecutableRef::Method(method) => {
                self.load_class(&method.declaring)?;
                let signature = method.signature();
                match receiver {
                    None => {
                        let resolved = self.resolve_signature(&method.declaring, &signature)?;
                        self.call(&resolved, None, args)
                    }
                    Some(Value::Ref(object)) => {
                        if let Some(result) = self.dispatch_synthetic(object, &method.name, args) {
                            return result;
                        }
                        let runtime = self.heap.get(object)?.class.clone();
                        let resolved = self
                            .resolve_signature(&runtime, &signature)
                            .or_else(|_| self.resolve_signature(&method.declaring, &signature))?;
                        self.call(&resolved, Some(Value::Ref(object)), args)
                    }
                    Some(Value::Null) => Err(self.null_receiver(&method.name)),
                    Some(other) => Err(Unwind::Host(ExecError::construction(format!(
                        "receiver of {method} is not an object: {other:?}"
                    )))),
                }
            }
        }
    }
}

impl Introspection for Machine {
    fn class_of(&self, object: ObjectId) -> ExecResult<ClassId> {
        Ok(self.heap.get(object)?.class.clone())
    }

    fn kind(&self, object: ObjectId) -> ExecResult<&ObjectKind> {
        Ok(&self.heap.get(object)?.kind)
    }

    fn is_user_class(&self, class: &ClassId) -> bool {
        !class.is_std() && self.class_path.find(class).is_some()
    }

    fn instance_fields(&self, class: &ClassId) -> ExecResult<Vec<FieldInfo>> {
        if !self.classes.contains_key(class) {
            return Err(ExecError::class_not_found(class.name()));
        }
        let mut fields = Vec::new();
        let mut current = self.classes.get(class).cloned();
        while let Some(def) = current {
            fields.extend(
                def.fields
                    .iter()
                    .filter(|f| !f.is_static)
                    .map(|f| FieldInfo::of(&def.name, f)),
            );
            current = def
                .superclass
                .as_ref()
                .and_then(|s| self.classes.get(s).cloned());
        }
        Ok(fields)
    }

    fn get_field(&self, object: ObjectId, field: &FieldRef) -> ExecResult<Value> {
        match &self.heap.get(object)?.kind {
            ObjectKind::Instance { fields } => fields
                .get(field)
                .cloned()
                .ok_or_else(|| ExecError::field_not_found(field.declaring.name(), &field.name)),
            _ => Err(ExecError::field_not_found(field.declaring.name(), &field.name)),
        }
    }

    fn get_static(&self, field: &FieldRef) -> ExecResult<Value> {
        self.statics
            .get(field)
            .cloned()
            .ok_or_else(|| ExecError::field_not_found(field.declaring.name(), &field.name))
    }

    fn is_static_method(&self, class: &ClassId, name: &str) -> ExecResult<bool> {
        let def = self.class_def(class)?;
        def.methods
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.is_static)
            .ok_or_else(|| ExecError::executable_not_found(class.name(), name))
    }

    fn ensure_loaded(&mut self, class: &ClassId) -> ExecResult<()> {
        self.load_class(class).map(|_| ())
    }

    fn allocate_uninit(&mut self, class: &ClassId) -> ExecResult<ObjectId> {
        self.fresh_instance(class)
    }

    fn set_accessible(&mut self, field: &FieldRef, accessible: bool) -> ExecResult<bool> {
        let previous = self.accessible.contains(field);
        if accessible {
            self.accessible.insert(field.clone());
        } else {
            self.accessible.remove(field);
        }
        Ok(previous)
    }

    fn set_field(&mut self, object: ObjectId, field: &FieldRef, value: Value) -> ExecResult<()> {
        let def = self.class_def(&field.declaring)?;
        let declared = def
            .field(&field.name)
            .ok_or_else(|| ExecError::field_not_found(field.declaring.name(), &field.name))?;
        if declared.visibility == super::class::Visibility::Private && !self.accessible.contains(field) {
            return Err(ExecError::construction(format!("field {field} is not accessible")));
        }
        match &mut self.heap.get_mut(object)?.kind {
            ObjectKind::Instance { fields } if fields.contains_key(field) => {
                fields.insert(field.clone(), value);
                Ok(())
            }
            _ => Err(ExecError::field_not_found(field.declaring.name(), &field.name)),
        }
    }

    fn set_static(&mut self, field: &FieldRef, value: Value) -> ExecResult<Value> {
        self.load_class(&field.declaring)?;
        let previous = self
            .statics
            .get_mut(field)
            .ok_or_else(|| ExecError::field_not_found(field.declaring.name(), &field.name))?;
        Ok(std::mem::replace(previous, value))
    }

    fn invoke(
        &mut self,
        executable: &ExecutableRef,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        self.invoke_executable(executable, receiver, args)
    }

    fn new_array(&mut self, element: &ClassId, length: usize) -> ExecResult<ObjectId> {
        let fill = PrimitiveValue::default_for(element).map_or(Value::Null, Value::Prim);
        Ok(self.heap.alloc(HeapObject {
            class: element.array_of(),
            kind: ObjectKind::Array {
                element: element.clone(),
                items: vec![fill; length],
            },
        }))
    }

    fn array_store(&mut self, array: ObjectId, index: usize, value: Value) -> ExecResult<()> {
        match &mut self.heap.get_mut(array)?.kind {
            ObjectKind::Array { items, .. } => {
                let len = items.len();
                let slot = items
                    .get_mut(index)
                    .ok_or_else(|| ExecError::construction(format!("index {index} out of bounds for length {len}")))?;
                *slot = value;
                Ok(())
            }
            _ => Err(ExecError::heap(format!("{array} is not an array"))),
        }
    }

    fn enum_constant(&mut self, class: &ClassId, name: &str) -> ExecResult<ObjectId> {
        self.load_class(class)?;
        self.statics
            .get(&FieldRef::new(class.clone(), name))
            .and_then(Value::object)
            .ok_or_else(|| ExecError::field_not_found(class.name(), name))
    }

    fn class_ref(&mut self, class: &ClassId) -> ExecResult<ObjectId> {
        if let Some(id) = self.class_refs.get(class) {
            return Ok(*id);
        }
        let id = self.heap.alloc(HeapObject {
            class: ClassId::new(ClassId::CLASS),
            kind: ObjectKind::ClassRef {
                target: class.clone(),
            },
        });
        self.class_refs.insert(class.clone(), id);
        Ok(id)
    }

    fn known_class_ref(&self, class: &ClassId) -> Option<ObjectId> {
        self.class_refs.get(class).copied()
    }

    fn new_proxy(&mut self, interfaces: Vec<ClassId>, handler: Value) -> ExecResult<ObjectId> {
        let n = self.next_synthetic();
        Ok(self.heap.alloc(HeapObject {
            class: ClassId::new(format!("{}{n}", super::PROXY_CLASS_PREFIX)),
            kind: ObjectKind::Proxy { interfaces, handler },
        }))
    }

    fn new_lambda(&mut self, spec: LambdaSpec) -> ExecResult<ObjectId> {
        let n = self.next_synthetic();
        Ok(self.heap.alloc(HeapObject {
            class: ClassId::new(format!("{}{}{n}", spec.declaring, super::LAMBDA_CLASS_MARKER)),
            kind: ObjectKind::Lambda {
                sam: spec.sam,
                declaring: spec.declaring,
                method: spec.method,
                receiver: spec.receiver,
                captured: spec.captured,
            },
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn calculator(m: &mut Machine) -> Value {
        let ctor = fixtures::constructor("samples.Calculator", &[]);
        m.invoke_executable(&ctor.into(), None, &[]).unwrap()
    }

    #[test]
    fn test_loading_initializes_statics() {
        let mut m = fixtures::machine();
        m.load_class(&ClassId::new("samples.Counter")).unwrap();
        let count = m.get_static(&FieldRef::new("samples.Counter", "count")).unwrap();
        assert_eq!(count, Value::int(0));
        let label = m.get_static(&FieldRef::new("samples.Counter", "label")).unwrap();
        assert!(label.is_null());
    }

    #[test]
    fn test_unknown_class_is_not_found() {
        let mut m = fixtures::machine();
        let err = m.load_class(&ClassId::new("samples.Missing")).unwrap_err();
        assert!(matches!(err, ExecError::ClassNotFound { .. }));
        assert!(m.class_def(&ClassId::new("samples.Util")).is_err());
    }

    #[test]
    fn test_warmup_loads_every_user_class() {
        let mut m = fixtures::machine();
        let loaded = m.warmup().unwrap();
        assert!(loaded >= 10);
        assert!(m.class_def(&ClassId::new("samples.Looper")).is_ok());
        assert!(m.instrumenter().get(&ClassId::new("samples.Calculator")).is_some());
    }

    #[test]
    fn test_enum_constants_are_shared() {
        let mut m = fixtures::machine();
        let green = m.enum_constant(&ClassId::new("samples.Color"), "GREEN").unwrap();
        let again = m.enum_constant(&ClassId::new("samples.Color"), "GREEN").unwrap();
        assert_eq!(green, again);
        assert_eq!(m.class_of(green).unwrap(), ClassId::new("samples.Color"));
        assert!(m.enum_constant(&ClassId::new("samples.Color"), "PURPLE").is_err());
    }

    #[test]
    fn test_static_invocation() {
        let mut m = fixtures::machine();
        let twice = fixtures::method("samples.Util", "twice", &["int"], "int");
        let result = m.invoke_executable(&twice.into(), None, &[Value::int(21)]).unwrap();
        assert_eq!(result, Value::int(42));
    }

    #[test]
    fn test_division_by_zero_throws() {
        let mut m = fixtures::machine();
        let receiver = calculator(&mut m);
        let divide = fixtures::method("samples.Calculator", "divide", &["int", "int"], "int");
        let unwind = m
            .invoke_executable(&divide.into(), Some(receiver), &[Value::int(6), Value::int(0)])
            .unwrap_err();
        let Unwind::Exception(object) = unwind else {
            panic!("expected exception, got {unwind}");
        };
        let cause = m.describe_exception(object);
        assert_eq!(cause.class_id, ClassId::new("std.ArithmeticException"));
        assert_eq!(cause.message, "/ by zero");
        assert!(m.is_assignable(&cause.class_id, &ClassId::new("std.RuntimeException")));
    }

    #[test]
    fn test_null_receiver_throws() {
        let mut m = fixtures::machine();
        let add = fixtures::method("samples.Calculator", "add", &["int", "int"], "int");
        let unwind = m
            .invoke_executable(&add.into(), Some(Value::Null), &[Value::int(1), Value::int(2)])
            .unwrap_err();
        assert!(matches!(unwind, Unwind::Exception(_)));
    }

    #[test]
    fn test_sandbox_refuses_file_access() {
        let mut m = fixtures::machine();
        let read = fixtures::method("samples.Disk", "read", &[ClassId::STRING], ClassId::STRING);
        let unwind = m
            .invoke_executable(&read.into(), None, &[Value::string("/etc/passwd")])
            .unwrap_err();
        assert!(matches!(unwind, Unwind::Sandbox(_)));
    }

    #[test]
    fn test_interrupt_stops_running_code() {
        let mut m = fixtures::machine();
        let ctor = fixtures::constructor("samples.Looper", &[]);
        let looper = m.invoke_executable(&ctor.into(), None, &[]).unwrap();
        m.interrupt_flag().store(true, Ordering::Relaxed);
        let spin = fixtures::method("samples.Looper", "spin", &[], "void");
        let unwind = m.invoke_executable(&spin.into(), Some(looper), &[]).unwrap_err();
        assert!(matches!(unwind, Unwind::Interrupted));
        m.clear_interrupt();
        assert!(!m.interrupted());
    }

    #[test]
    fn test_garbage_collection_keeps_static_roots() {
        let mut m = fixtures::machine();
        m.load_class(&ClassId::new("samples.Color")).unwrap();
        let baseline = m.live_objects();
        let node = m.allocate_uninit(&ClassId::new("samples.Node")).unwrap();
        assert_eq!(m.live_objects(), baseline + 1);
        assert!(m.collect_garbage() >= 1);
        assert!(m.class_of(node).is_err());
        assert!(m.enum_constant(&ClassId::new("samples.Color"), "RED").is_ok());
    }

    #[test]
    fn test_static_mock_slot_owner() {
        let mut m = fixtures::machine();
        m.load_class(&ClassId::new("samples.Util")).unwrap();
        let twice = fixtures::method("samples.Util", "twice", &["int"], "int");
        assert_eq!(m.static_mock_slot_owner(&twice), Some(ClassId::new("samples.Util")));
        let missing = fixtures::method("samples.Util", "thrice", &["int"], "int");
        assert_eq!(m.static_mock_slot_owner(&missing), None);
    }
}
