//! Per-worker execution context.

use super::phase::{InvocationPhase, PhaseTracker};
use super::watchdog::{UnresponsiveHook, Watchdog};
use crate::config::InstrumentationSpec;
use crate::construct::{
    CustomConstructors, ExpansionStrategy, IdentityCache, MockInstallation, ModelConstructor,
    ValueConstructor,
};
use crate::coverage::ClassCoverage;
use crate::mock::MockController;
use crate::model::{
    ClassId, ConcreteExecutionData, ConcreteExecutionResult, ConstructorRef, Coverage,
    EnvironmentModels, ExecutableRef, ExecutionResult, FailureCause, FailureKind, FieldRef,
    MethodRef, Model,
};
use crate::result::{ExecError, ExecResult};
use crate::runtime::{Introspection, Machine, ObjectId, ProgramCatalog, Unwind, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default grace period between interrupting and giving up on user code
pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_millis(200);

/// Target of one invocation after resolution
#[derive(Debug, Clone)]
struct Target {
    executable: ExecutableRef,
    is_static: bool,
    /// Type the returned value is described as
    return_type: ClassId,
}

/// Things to undo once an invocation ends, whatever its outcome
#[derive(Debug, Default)]
struct Cleanup {
    controllers: Vec<MockController>,
    statics: Vec<(FieldRef, Value)>,
}

/// How the target call ended, before conversion to models
enum Outcome {
    Returned(Value),
    Threw(ObjectId),
}

/// Everything one worker needs to run invocations.
///
/// Owns the host machine, and with it the mock registry and the trace
/// recorder. Invocations are strictly sequential; the [`PhaseTracker`]
/// rejects any attempt to start one while another is unfinished.
#[derive(Debug)]
pub struct ExecutionContext {
    machine: Machine,
    customs: CustomConstructors,
    spec: InstrumentationSpec,
    interrupt_grace: Duration,
    on_unresponsive: Option<UnresponsiveHook>,
    phase: PhaseTracker,
}

impl ExecutionContext {
    /// Context loading classes from `catalog`
    #[must_use]
    pub fn new(catalog: Arc<ProgramCatalog>) -> Self {
        Self {
            machine: Machine::new(catalog),
            customs: CustomConstructors::default(),
            spec: InstrumentationSpec::default(),
            interrupt_grace: DEFAULT_INTERRUPT_GRACE,
            on_unresponsive: None,
            phase: PhaseTracker::new(),
        }
    }

    /// Replace the custom model constructors
    #[must_use]
    pub fn with_customs(mut self, customs: CustomConstructors) -> Self {
        self.customs = customs;
        self
    }

    /// Set the watchdog interrupt grace period
    #[must_use]
    pub const fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    /// Run `hook` when interrupted code does not unwind in time
    #[must_use]
    pub fn with_unresponsive_hook(mut self, hook: UnresponsiveHook) -> Self {
        self.on_unresponsive = Some(hook);
        self
    }

    /// Host machine
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Host machine
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Current invocation phase
    #[must_use]
    pub const fn phase(&self) -> InvocationPhase {
        self.phase.current()
    }

    /// Active instrumentation settings
    #[must_use]
    pub const fn instrumentation(&self) -> &InstrumentationSpec {
        &self.spec
    }

    /// Add class path entries
    pub fn add_paths(&mut self, entries: &[String]) -> ExecResult<usize> {
        let added = self.machine.add_paths(entries)?;
        debug!(added, "class path extended");
        Ok(added)
    }

    /// Load and instrument every user class
    pub fn warmup(&mut self) -> ExecResult<usize> {
        let loaded = self.machine.warmup()?;
        info!(loaded, "warmup complete");
        Ok(loaded)
    }

    /// Apply instrumentation settings to subsequent invocations
    pub fn set_instrumentation(&mut self, spec: InstrumentationSpec) {
        self.machine.set_policy(spec.policy.clone());
        self.machine.trace_mut().set_capacity(spec.trace_capacity);
        debug!(max_depth = spec.max_depth, trace_capacity = spec.trace_capacity, "instrumentation set");
        self.spec = spec;
    }

    /// Coverage of `class` accumulated since warmup
    pub fn collect_coverage(&self, class: &ClassId) -> ExecResult<ClassCoverage> {
        self.machine
            .instrumenter()
            .coverage_of(class)
            .ok_or_else(|| ExecError::class_not_found(class.name()))
    }

    /// Model of a static field's current value; only user classes are
    /// expanded
    pub fn compute_static_field(&mut self, field: &FieldRef) -> ExecResult<Model> {
        self.machine.ensure_loaded(&field.declaring)?;
        let value = self.machine.get_static(field)?;
        let declared = self.static_field_type(field);
        let mut session = IdentityCache::new();
        let model = ModelConstructor::new(
            &self.machine,
            &mut session,
            &self.customs,
            ExpansionStrategy::UserClassesOrCached,
        )
        .construct(&value, &declared, self.spec.max_depth)?;
        self.machine.collect_garbage();
        Ok(model)
    }

    /// Run one method or constructor of `class` against a state snapshot.
    ///
    /// Failures of the invoked code come back as [`ExecutionResult`]
    /// failures. `Err` means the worker itself could not do its job.
    #[instrument(skip_all, fields(class = %class, signature))]
    pub fn invoke(
        &mut self,
        class: &ClassId,
        signature: &str,
        data: &ConcreteExecutionData,
    ) -> ExecResult<ConcreteExecutionResult> {
        if self.phase.current() != InvocationPhase::Idle {
            return Err(ExecError::poisoned(format!(
                "invocation started while in phase {}",
                self.phase.current()
            )));
        }
        self.machine.trace_mut().reset();
        self.machine.clear_interrupt();

        let mut cleanup = Cleanup::default();
        let outcome = self.run(class, signature, data, &mut cleanup);
        self.finish(cleanup);
        outcome
    }

    fn resolve(&mut self, class: &ClassId, signature: &str) -> ExecResult<Target> {
        self.machine.load_class(class)?;
        let resolved = self.machine.resolve_signature(class, signature)?;
        let def = resolved.def();
        let target = if def.is_constructor() {
            Target {
                executable: ExecutableRef::Constructor(ConstructorRef::new(
                    class.clone(),
                    def.params.clone(),
                )),
                is_static: false,
                return_type: class.clone(),
            }
        } else {
            Target {
                executable: ExecutableRef::Method(def.method_ref(resolved.declaring())),
                is_static: def.is_static,
                return_type: def.return_type.clone(),
            }
        };
        Ok(target)
    }

    fn run(
        &mut self,
        class: &ClassId,
        signature: &str,
        data: &ConcreteExecutionData,
        cleanup: &mut Cleanup,
    ) -> ExecResult<ConcreteExecutionResult> {
        let target = self.resolve(class, signature)?;
        let mut session = IdentityCache::for_state(&data.state_before);

        let built = {
            let mut values = ValueConstructor::new(&mut self.machine, &mut session);
            let built = values
                .construct_state(&data.state_before)
                .and_then(|state| values.construct_instrumentation(&data.instrumentation).map(|()| state));
            match built {
                Ok(state) => (state, values.take_effects()),
                Err(err) => return self.short_circuit(err),
            }
        };
        let (state, effects) = built;

        for (field, value) in &state.statics {
            let previous = self.machine.set_static(field, value.clone())?;
            cleanup.statics.push((field.clone(), previous));
        }
        self.phase.enter(InvocationPhase::ParamsBuilt)?;

        for effect in effects {
            match self.resolve_mock_slot(effect) {
                Ok(effect) => cleanup.controllers.push(effect.install(self.machine.mocks_mut())),
                Err(err) => return self.short_circuit(err),
            }
        }
        self.phase.enter(InvocationPhase::MocksInstalled)?;

        let receiver = match target.executable {
            ExecutableRef::Method(_) if !target.is_static => {
                Some(state.this_instance.clone().unwrap_or(Value::Null))
            }
            _ => None,
        };

        self.phase.enter(InvocationPhase::Invoking)?;
        let watchdog = Watchdog::arm(
            self.machine.interrupt_flag(),
            Duration::from_millis(data.timeout_ms),
            self.interrupt_grace,
            self.on_unresponsive,
        );
        let called = self
            .machine
            .invoke_executable(&target.executable, receiver, &state.parameters);
        let fired = watchdog.disarm();

        let outcome = match called {
            Ok(value) => Outcome::Returned(value),
            Err(Unwind::Exception(object)) => Outcome::Threw(object),
            Err(Unwind::Interrupted) => {
                self.phase.enter(InvocationPhase::TimedOut)?;
                warn!(timeout_ms = data.timeout_ms, fired, "invocation timed out");
                return self.finish_without_state(ExecutionResult::failure(
                    FailureKind::Timeout,
                    FailureCause::new("$Timeout", format!("exceeded {} ms", data.timeout_ms)),
                ));
            }
            Err(Unwind::Sandbox(message)) => {
                self.phase.enter(InvocationPhase::Completed)?;
                return self.finish_without_state(ExecutionResult::failure(
                    FailureKind::Sandbox,
                    FailureCause::new("$Sandbox", message),
                ));
            }
            Err(Unwind::MockResolution(message)) => {
                self.phase.enter(InvocationPhase::Completed)?;
                return self.finish_without_state(ExecutionResult::failure(
                    FailureKind::MockResolution,
                    FailureCause::new("$MockResolution", message),
                ));
            }
            Err(Unwind::Host(err)) => {
                self.phase.enter(InvocationPhase::Crashed)?;
                return Err(err);
            }
        };
        self.phase.enter(InvocationPhase::Completed)?;

        let result = match &outcome {
            Outcome::Returned(_) => None,
            Outcome::Threw(object) => Some(self.classify_exception(*object)),
        };
        let converted = self.capture_after(&mut session, &target, state.this_instance.as_ref(), &state.parameters, data, &outcome);
        let (state_after, returned) = match converted {
            Ok(pair) => pair,
            Err(ExecError::StreamConsumed { class }) => {
                return self.finish_without_state(ExecutionResult::failure(
                    FailureKind::StreamAlreadyConsumed,
                    FailureCause::new(ClassId::new(class), "stream has already been operated upon or closed"),
                ));
            }
            Err(err) => return Err(err),
        };
        self.phase.enter(InvocationPhase::ResultConverted)?;

        let result = result
            .or_else(|| returned.map(ExecutionResult::Success))
            .unwrap_or(ExecutionResult::Success(Model::Void));
        debug!(failure = ?result.failure_kind(), "invocation converted");
        Ok(ConcreteExecutionResult {
            state_after: Some(state_after),
            result,
            coverage: self.coverage(&target),
        })
    }

    /// Static-method mocks are keyed on the class carrying the mock slot,
    /// which may be a superclass of the one named in the instruction
    fn resolve_mock_slot(&mut self, effect: MockInstallation) -> ExecResult<MockInstallation> {
        let MockInstallation::Method {
            instance: None,
            method,
            values,
        } = effect
        else {
            return Ok(effect);
        };
        if self.machine.ensure_loaded(&method.declaring).is_err() {
            return Err(ExecError::mock_resolution(format!(
                "class of static mock {method} cannot be loaded"
            )));
        }
        let owner = self.machine.static_mock_slot_owner(&method).ok_or_else(|| {
            ExecError::mock_resolution(format!(
                "no class in the hierarchy of {} carries a mock slot for {}",
                method.declaring,
                method.signature()
            ))
        })?;
        Ok(MockInstallation::Method {
            instance: None,
            method: MethodRef {
                declaring: owner,
                ..method
            },
            values,
        })
    }

    /// A failure before the call becomes a result; only fatal errors stay
    /// errors
    fn short_circuit(&mut self, err: ExecError) -> ExecResult<ConcreteExecutionResult> {
        let (kind, cause) = match err {
            ExecError::Sandbox { message } => (FailureKind::Sandbox, FailureCause::new("$Sandbox", message)),
            ExecError::MockResolution { message } => (
                FailureKind::MockResolution,
                FailureCause::new("$MockResolution", message),
            ),
            ExecError::StreamConsumed { class } => (
                FailureKind::StreamAlreadyConsumed,
                FailureCause::new(ClassId::new(class), "stream has already been operated upon or closed"),
            ),
            fatal if fatal.is_fatal() => return Err(fatal),
            other => (
                FailureKind::ConcreteExecution,
                FailureCause::new("$ConcreteExecution", other.to_string()),
            ),
        };
        debug!(%kind, "invocation short-circuited before the call");
        self.finish_without_state(ExecutionResult::failure(kind, cause))
    }

    fn finish_without_state(&mut self, result: ExecutionResult) -> ExecResult<ConcreteExecutionResult> {
        self.phase.enter(InvocationPhase::ResultConverted)?;
        Ok(ConcreteExecutionResult::missing_state(result))
    }

    fn classify_exception(&self, object: ObjectId) -> ExecutionResult {
        let trace = self.machine.trace();
        let from_nested_call = trace.ended_in_nested_call();
        let kind = if trace.last_kind() == Some(crate::coverage::InstructionKind::ExplicitThrow) {
            FailureKind::ExplicitThrow { from_nested_call }
        } else {
            FailureKind::ImplicitThrow { from_nested_call }
        };
        ExecutionResult::failure(kind, self.machine.describe_exception(object))
    }

    /// After-state and returned value, through the session the before
    /// state was built with
    fn capture_after(
        &self,
        session: &mut IdentityCache,
        target: &Target,
        this_instance: Option<&Value>,
        parameters: &[Value],
        data: &ConcreteExecutionData,
        outcome: &Outcome,
    ) -> ExecResult<(EnvironmentModels, Option<Model>)> {
        let depth = self.spec.max_depth;
        let statics = data
            .state_before
            .statics
            .keys()
            .map(|field| Ok((field.clone(), self.machine.get_static(field)?, self.static_field_type(field))))
            .collect::<ExecResult<Vec<_>>>()?;

        let mut models = ModelConstructor::new(
            &self.machine,
            session,
            &self.customs,
            ExpansionStrategy::UserClassesOrCached,
        );
        let this_instance = this_instance
            .map(|value| models.construct(value, target.executable.declaring(), depth))
            .transpose()?;
        let object = ClassId::new(ClassId::OBJECT);
        let parameters = parameters
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let declared = target.executable.params().get(index).unwrap_or(&object);
                models.construct(value, declared, depth)
            })
            .collect::<ExecResult<Vec<_>>>()?;
        let mut after = EnvironmentModels::new(this_instance, parameters);
        for (field, value, declared) in statics {
            let model = models.construct(&value, &declared, depth)?;
            after.statics.insert(field, model);
        }
        let returned = match outcome {
            Outcome::Returned(value) => Some(models.construct(value, &target.return_type, depth)?),
            Outcome::Threw(_) => None,
        };
        Ok((after, returned))
    }

    fn static_field_type(&self, field: &FieldRef) -> ClassId {
        self.machine
            .class_def(&field.declaring)
            .ok()
            .and_then(|def| {
                def.fields
                    .iter()
                    .find(|f| f.is_static && f.name == field.name)
                    .map(|f| f.class_id.clone())
            })
            .unwrap_or_else(|| ClassId::new(ClassId::OBJECT))
    }

    fn coverage(&self, target: &Target) -> Coverage {
        Coverage {
            instructions: self.machine.trace().instructions(),
            instructions_count: self
                .machine
                .instrumenter()
                .instructions_count(target.executable.declaring()),
        }
    }

    /// Undo everything the invocation installed and return to idle
    fn finish(&mut self, cleanup: Cleanup) {
        for controller in cleanup.controllers {
            self.machine.mocks_mut().close(controller);
        }
        for (field, previous) in cleanup.statics.into_iter().rev() {
            if let Err(err) = self.machine.set_static(&field, previous) {
                warn!(field = %field, error = %err, "failed to restore static field");
            }
        }
        self.machine.accumulate_trace();
        self.machine.trace_mut().reset();
        self.machine.clear_interrupt();
        let freed = self.machine.collect_garbage();
        debug!(freed, live = self.machine.live_objects(), "invocation finished");
        self.phase.reset();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::model::{CompositeModel, Handle, Instrumentation};
    use crate::runtime::{Permission, SandboxPolicy};
    use std::collections::BTreeSet;
    use std::time::Instant;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Arc::new(fixtures::catalog()));
        ctx.add_paths(&[fixtures::ENTRY.to_string()]).unwrap();
        ctx.warmup().unwrap();
        ctx
    }

    fn instance(handle: u32, class: &str) -> Model {
        CompositeModel::new(Some(Handle::new(handle)), ClassId::new(class)).into()
    }

    fn run(ctx: &mut ExecutionContext, class: &str, signature: &str, state: EnvironmentModels) -> ConcreteExecutionResult {
        let data = ConcreteExecutionData::new(state, 1000);
        ctx.invoke(&ClassId::new(class), signature, &data).unwrap()
    }

    fn calculator_call(ctx: &mut ExecutionContext, signature: &str, args: Vec<Model>) -> ConcreteExecutionResult {
        let state = EnvironmentModels::new(Some(instance(1, "samples.Calculator")), args);
        run(ctx, "samples.Calculator", signature, state)
    }

    mod outcome_tests {
        use super::*;

        #[test]
        fn test_success_carries_state_and_coverage() {
            let mut ctx = context();
            let result = calculator_call(&mut ctx, "add(int,int)int", vec![Model::int(2), Model::int(3)]);
            assert_eq!(result.result.success(), Some(&Model::int(5)));
            let after = result.state_after.unwrap();
            assert_eq!(after.parameters, vec![Model::int(2), Model::int(3)]);
            assert_eq!(after.this_instance.unwrap().id(), Some(Handle::new(1)));
            assert_eq!(result.coverage.instructions.len(), 2);
            assert!(result.coverage.instructions_count.is_some());
            assert_eq!(ctx.phase(), InvocationPhase::Idle);
        }

        #[test]
        fn test_runtime_error_is_implicit() {
            let mut ctx = context();
            let result = calculator_call(&mut ctx, "divide(int,int)int", vec![Model::int(1), Model::int(0)]);
            assert_eq!(
                result.result.failure_kind(),
                Some(FailureKind::ImplicitThrow {
                    from_nested_call: false
                })
            );
            assert!(result.state_after.is_some());
        }

        #[test]
        fn test_throw_site_is_explicit() {
            let mut ctx = context();
            let result = calculator_call(&mut ctx, "checkedDivide(int,int)int", vec![Model::int(1), Model::int(0)]);
            let ExecutionResult::Failure(failure) = result.result else {
                panic!("expected a failure");
            };
            assert_eq!(
                failure.kind,
                FailureKind::ExplicitThrow {
                    from_nested_call: false
                }
            );
            assert_eq!(failure.cause.class_id, ClassId::new("std.IllegalArgumentException"));
            assert_eq!(failure.cause.message, "divisor is zero");
        }

        #[test]
        fn test_throw_in_helper_is_nested() {
            let mut ctx = context();
            let result = calculator_call(&mut ctx, "viaHelper(int)int", vec![Model::int(-1)]);
            assert_eq!(
                result.result.failure_kind(),
                Some(FailureKind::ExplicitThrow {
                    from_nested_call: true
                })
            );
        }

        #[test]
        fn test_infinite_loop_times_out() {
            let mut ctx = context();
            let state = EnvironmentModels::new(Some(instance(1, "samples.Looper")), vec![]);
            let data = ConcreteExecutionData::new(state, 100);
            let started = Instant::now();
            let result = ctx.invoke(&ClassId::new("samples.Looper"), "spin()void", &data).unwrap();
            assert!(started.elapsed() < Duration::from_millis(200));
            assert_eq!(result.result.failure_kind(), Some(FailureKind::Timeout));
            assert!(result.state_after.is_none());

            let again = calculator_call(&mut ctx, "add(int,int)int", vec![Model::int(1), Model::int(1)]);
            assert_eq!(again.result.success(), Some(&Model::int(2)));
        }

        #[test]
        fn test_forbidden_io_is_sandbox_failure() {
            let mut ctx = context();
            let state = EnvironmentModels::new(None, vec![Model::string("/etc/passwd")]);
            let result = run(&mut ctx, "samples.Disk", "read(std.String)std.String", state);
            assert_eq!(result.result.failure_kind(), Some(FailureKind::Sandbox));
            assert!(result.state_after.is_none());
        }

        #[test]
        fn test_constructor_returns_new_object() {
            let mut ctx = context();
            let state = EnvironmentModels::new(None, vec![Model::int(9)]);
            let result = run(&mut ctx, "samples.Node", "<init>(int)void", state);
            let Some(Model::Composite(node)) = result.result.success() else {
                panic!("expected a composite");
            };
            assert_eq!(node.fields.get(&FieldRef::new("samples.Node", "value")), Some(&Model::int(9)));
        }

        #[test]
        fn test_unknown_method_is_an_error() {
            let mut ctx = context();
            let data = ConcreteExecutionData::new(EnvironmentModels::default(), 100);
            let err = ctx
                .invoke(&ClassId::new("samples.Calculator"), "nope()void", &data)
                .unwrap_err();
            assert!(matches!(err, ExecError::ExecutableNotFound { .. }));
            assert_eq!(ctx.phase(), InvocationPhase::Idle);
        }
    }

    mod mock_tests {
        use super::*;

        #[test]
        fn test_static_mock_answers_then_is_removed() {
            let mut ctx = context();
            let twice = fixtures::method("samples.Util", "twice", &["int"], "int");
            let state = EnvironmentModels::new(None, vec![Model::int(3)]);
            let data = ConcreteExecutionData::new(state.clone(), 1000).with_instrumentation(
                Instrumentation::StaticMethod {
                    method: twice,
                    values: vec![Model::int(100), Model::int(7)],
                },
            );
            let result = ctx.invoke(&ClassId::new("samples.Util"), "quad(int)int", &data).unwrap();
            assert_eq!(result.result.success(), Some(&Model::int(7)));
            assert!(ctx.machine().mocks().is_empty());

            let real = run(&mut ctx, "samples.Util", "quad(int)int", state);
            assert_eq!(real.result.success(), Some(&Model::int(12)));
        }

        #[test]
        fn test_static_mock_without_slot_fails_fast() {
            let mut ctx = context();
            let missing = fixtures::method("samples.Util", "thrice", &["int"], "int");
            let data = ConcreteExecutionData::new(EnvironmentModels::new(None, vec![Model::int(3)]), 1000)
                .with_instrumentation(Instrumentation::StaticMethod {
                    method: missing,
                    values: vec![Model::int(1)],
                });
            let result = ctx.invoke(&ClassId::new("samples.Util"), "quad(int)int", &data).unwrap();
            assert_eq!(result.result.failure_kind(), Some(FailureKind::MockResolution));
            assert!(ctx.machine().mocks().is_empty());
        }

        #[test]
        fn test_new_instance_mock_respects_call_site() {
            let mut ctx = context();
            let fake = CompositeModel::new(Some(Handle::new(50)), ClassId::new("samples.Engine"))
                .with_field(FieldRef::new("samples.Engine", "power"), Model::int(1));
            let instrumented = |car: &str| {
                let state = EnvironmentModels::new(Some(instance(1, car)), vec![]);
                ConcreteExecutionData::new(state, 1000).with_instrumentation(Instrumentation::NewInstance {
                    class_id: ClassId::new("samples.Engine"),
                    instances: vec![fake.clone().into()],
                    call_sites: BTreeSet::from([ClassId::new("samples.CarA")]),
                })
            };
            let power = |result: &ConcreteExecutionResult| match result.result.success() {
                Some(Model::Composite(engine)) => engine
                    .fields
                    .get(&FieldRef::new("samples.Engine", "power"))
                    .cloned(),
                _ => None,
            };

            let a = ctx
                .invoke(&ClassId::new("samples.CarA"), "build()samples.Engine", &instrumented("samples.CarA"))
                .unwrap();
            assert_eq!(power(&a), Some(Model::int(1)));
            let b = ctx
                .invoke(&ClassId::new("samples.CarB"), "build()samples.Engine", &instrumented("samples.CarB"))
                .unwrap();
            assert_eq!(power(&b), Some(Model::int(100)));
        }

        #[test]
        fn test_exhausted_mock_without_body_fails() {
            let mut ctx = context();
            let next = fixtures::method("samples.Source", "next", &[], "int");
            let source = CompositeModel::new(Some(Handle::new(1)), ClassId::new("samples.Source"))
                .with_mock(true)
                .with_mocked(next, vec![Model::int(4)]);
            let state = EnvironmentModels::new(Some(source.clone().into()), vec![]);
            let first = run(&mut ctx, "samples.Source", "next()int", state);
            assert_eq!(first.result.success(), Some(&Model::int(4)));

            let empty = source.with_mocked(fixtures::method("samples.Source", "next", &[], "int"), vec![]);
            let state = EnvironmentModels::new(Some(empty.into()), vec![]);
            let second = run(&mut ctx, "samples.Source", "next()int", state);
            assert_eq!(second.result.failure_kind(), Some(FailureKind::MockResolution));
        }

        #[test]
        fn test_mock_queue_drains_then_real_body_runs() {
            let mut ctx = context();
            let fetch = fixtures::method("samples.Service", "fetch", &[], "int");
            let service = CompositeModel::new(Some(Handle::new(1)), ClassId::new("samples.Service"))
                .with_mock(true)
                .with_mocked(fetch, vec![Model::int(10), Model::int(20)]);
            let state = EnvironmentModels::new(None, vec![service.into()]);
            let result = run(&mut ctx, "samples.Relay", "fetchThrice(samples.Service)int[]", state);
            let Some(Model::Array(calls)) = result.result.success() else {
                panic!("expected an int array");
            };
            let values: Vec<Option<&Model>> = (0..3).map(|index| calls.element(index)).collect();
            assert_eq!(
                values,
                vec![Some(&Model::int(10)), Some(&Model::int(20)), Some(&Model::int(1))]
            );
            assert!(ctx.machine().mocks().is_empty());
        }

        #[test]
        fn test_mock_receiver_keeps_mock_flag_after() {
            let mut ctx = context();
            let fetch = fixtures::method("samples.Service", "fetch", &[], "int");
            let service = CompositeModel::new(Some(Handle::new(3)), ClassId::new("samples.Service"))
                .with_mock(true)
                .with_mocked(fetch, vec![Model::int(10)]);
            let state = EnvironmentModels::new(Some(service.into()), vec![]);
            let result = run(&mut ctx, "samples.Service", "fetch()int", state);
            assert_eq!(result.result.success(), Some(&Model::int(10)));
            let Some(Model::Composite(after)) = result.state_after.unwrap().this_instance else {
                panic!("expected a composite receiver");
            };
            assert_eq!(after.id, Some(Handle::new(3)));
            assert!(after.is_mock);
        }
    }

    mod state_tests {
        use super::*;

        #[test]
        fn test_statics_are_written_then_restored() {
            let mut ctx = context();
            let count = FieldRef::new("samples.Counter", "count");
            let state = EnvironmentModels::default().with_static(count.clone(), Model::int(41));
            let result = run(&mut ctx, "samples.Counter", "increment()int", state);
            assert_eq!(result.result.success(), Some(&Model::int(42)));
            assert_eq!(result.state_after.unwrap().statics.get(&count), Some(&Model::int(42)));
            assert_eq!(ctx.machine().get_static(&count).unwrap(), Value::int(0));
            assert_eq!(ctx.compute_static_field(&count).unwrap(), Model::int(0));
        }

        #[test]
        fn test_receiver_changes_are_captured() {
            let mut ctx = context();
            let balance = FieldRef::new("samples.Account", "balance");
            let account = CompositeModel::new(Some(Handle::new(7)), ClassId::new("samples.Account"))
                .with_field(balance.clone(), Model::int(5));
            let state = EnvironmentModels::new(Some(account.into()), vec![Model::int(10)]);
            let result = run(&mut ctx, "samples.Account", "deposit(int)void", state);
            assert_eq!(result.result.success(), Some(&Model::Void));
            let Some(Model::Composite(after)) = result.state_after.unwrap().this_instance else {
                panic!("expected a composite receiver");
            };
            assert_eq!(after.id, Some(Handle::new(7)));
            assert_eq!(after.fields.get(&balance), Some(&Model::int(15)));
        }

        #[test]
        fn test_sandbox_violation_while_building() {
            let mut ctx = context();
            ctx.set_instrumentation(InstrumentationSpec::new().with_policy(SandboxPolicy::default()));
            let assemble = crate::model::AssembleModel {
                id: Some(Handle::new(2)),
                class_id: ClassId::new(ClassId::STRING),
                display_name: "contents".to_string(),
                instantiation: crate::model::ExecutableCall::new(
                    fixtures::method("samples.Disk", "read", &[ClassId::STRING], ClassId::STRING),
                    vec![Model::string("/etc/hosts")],
                ),
                modifications: vec![],
            };
            let state = EnvironmentModels::new(None, vec![assemble.into()]);
            let result = run(&mut ctx, "samples.Calculator", "add(int,int)int", state);
            assert_eq!(result.result.failure_kind(), Some(FailureKind::Sandbox));
            assert_eq!(ctx.phase(), InvocationPhase::Idle);
            assert!(!ctx.machine().policy().permits(Permission::FileRead));
        }

        #[test]
        fn test_throwing_factory_is_a_concrete_execution_failure() {
            let mut ctx = context();
            let factory = crate::model::AssembleModel {
                id: Some(Handle::new(2)),
                class_id: ClassId::new("int"),
                display_name: "checked".to_string(),
                instantiation: crate::model::ExecutableCall::new(
                    fixtures::method("samples.Calculator", "check", &["int"], "int"),
                    vec![Model::int(-1)],
                ),
                modifications: vec![],
            };
            let state = EnvironmentModels::new(Some(instance(1, "samples.Calculator")), vec![
                factory.into(),
                Model::int(1),
            ]);
            let result = run(&mut ctx, "samples.Calculator", "add(int,int)int", state);
            let ExecutionResult::Failure(failure) = result.result else {
                panic!("expected a failure");
            };
            assert_eq!(failure.kind, FailureKind::ConcreteExecution);
            assert!(failure.cause.message.contains("std.IllegalStateException"));
            assert!(result.state_after.is_none());
            assert_eq!(ctx.phase(), InvocationPhase::Idle);

            let again = calculator_call(&mut ctx, "add(int,int)int", vec![Model::int(1), Model::int(1)]);
            assert_eq!(again.result.success(), Some(&Model::int(2)));
        }
    }

    mod coverage_tests {
        use super::*;

        #[test]
        fn test_coverage_accumulates_across_invocations() {
            let mut ctx = context();
            calculator_call(&mut ctx, "checkedDivide(int,int)int", vec![Model::int(4), Model::int(2)]);
            let partial = ctx.collect_coverage(&ClassId::new("samples.Calculator")).unwrap();
            calculator_call(&mut ctx, "checkedDivide(int,int)int", vec![Model::int(4), Model::int(0)]);
            let more = ctx.collect_coverage(&ClassId::new("samples.Calculator")).unwrap();
            assert_eq!(more.covered.len(), partial.covered.len() + 1);
            assert!(more.ratio() > partial.ratio());
        }

        #[test]
        fn test_unknown_class_coverage_is_an_error() {
            let ctx = context();
            assert!(ctx.collect_coverage(&ClassId::new("samples.Missing")).is_err());
        }
    }
}
