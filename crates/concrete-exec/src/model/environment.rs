//! State snapshots and execution outcomes.

use super::ids::{ClassId, FieldRef, Handle};
use super::statement::Instrumentation;
use super::value::Model;
use crate::coverage::InstructionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Full state snapshot, used both as "before" and "after"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentModels {
    /// Receiver, absent for static methods and constructors
    pub this_instance: Option<Model>,
    /// Arguments in declaration order
    pub parameters: Vec<Model>,
    /// Static fields the invocation reads or writes
    pub statics: BTreeMap<FieldRef, Model>,
}

impl EnvironmentModels {
    /// Snapshot of a static call with the given parameters
    #[must_use]
    pub fn new(this_instance: Option<Model>, parameters: Vec<Model>) -> Self {
        Self {
            this_instance,
            parameters,
            statics: BTreeMap::new(),
        }
    }

    /// Add a static field value
    #[must_use]
    pub fn with_static(mut self, field: FieldRef, value: Model) -> Self {
        self.statics.insert(field, value);
        self
    }

    /// Every top-level model in receiver, parameter, static order
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.this_instance
            .iter()
            .chain(self.parameters.iter())
            .chain(self.statics.values())
    }

    /// Largest handle used anywhere in the snapshot
    #[must_use]
    pub fn max_handle(&self) -> Option<Handle> {
        self.models().filter_map(Model::max_handle).max()
    }
}

/// Classification of a failed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Forbidden operation while materializing values or during the call
    Sandbox,
    /// The watchdog fired before the call returned
    Timeout,
    /// The worker process died; it must be replaced
    ProcessDeath,
    /// Exception raised by a deliberate throw site
    ExplicitThrow { from_nested_call: bool },
    /// Any other runtime exception
    ImplicitThrow { from_nested_call: bool },
    /// A lazily-consumed sequence was observed twice
    StreamAlreadyConsumed,
    /// A mock queue was exhausted with no real method to fall back to
    MockResolution,
    /// The state could not be materialized, e.g. an instantiation call threw
    ConcreteExecution,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandbox => write!(f, "SandboxFailure"),
            Self::Timeout => write!(f, "TimeoutFailure"),
            Self::ProcessDeath => write!(f, "ProcessDeathFailure"),
            Self::ExplicitThrow { from_nested_call } => {
                write!(f, "ExplicitThrow(nested={from_nested_call})")
            }
            Self::ImplicitThrow { from_nested_call } => {
                write!(f, "ImplicitThrow(nested={from_nested_call})")
            }
            Self::StreamAlreadyConsumed => write!(f, "StreamAlreadyConsumedFailure"),
            Self::MockResolution => write!(f, "MockResolutionFailure"),
            Self::ConcreteExecution => write!(f, "ConcreteExecutionFailure"),
        }
    }
}

/// What caused a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Exception class, or a synthetic marker class for host-level failures
    pub class_id: ClassId,
    /// Exception or failure message
    pub message: String,
}

impl FailureCause {
    /// Create a cause
    #[must_use]
    pub fn new(class_id: impl Into<ClassId>, message: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            message: message.into(),
        }
    }
}

/// Failed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Classification
    pub kind: FailureKind,
    /// What was thrown or went wrong
    pub cause: FailureCause,
}

/// Outcome of the target call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Value returned by the call; `Void` for void methods
    Success(Model),
    /// The call did not return normally
    Failure(ExecutionFailure),
}

impl ExecutionResult {
    /// Build a failure result
    #[must_use]
    pub fn failure(kind: FailureKind, cause: FailureCause) -> Self {
        Self::Failure(ExecutionFailure { kind, cause })
    }

    /// Failure kind, if any
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }

    /// Returned model, if successful
    #[must_use]
    pub const fn success(&self) -> Option<&Model> {
        match self {
            Self::Success(model) => Some(model),
            Self::Failure(_) => None,
        }
    }
}

/// Ordered record of instructions executed during one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Executed instructions in order
    pub instructions: Vec<InstructionId>,
    /// Total instruction count of the target's declaring class
    pub instructions_count: Option<u64>,
}

/// Input of one `invoke` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteExecutionData {
    /// State to materialize before the call
    pub state_before: EnvironmentModels,
    /// Static and new-instance mocking instructions
    pub instrumentation: Vec<Instrumentation>,
    /// Budget for the call itself
    pub timeout_ms: u64,
}

impl ConcreteExecutionData {
    /// Execution data without mocking instructions
    #[must_use]
    pub fn new(state_before: EnvironmentModels, timeout_ms: u64) -> Self {
        Self {
            state_before,
            instrumentation: Vec::new(),
            timeout_ms,
        }
    }

    /// Add a mocking instruction
    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: Instrumentation) -> Self {
        self.instrumentation.push(instrumentation);
        self
    }
}

/// Output of one `invoke` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteExecutionResult {
    /// `None` when the after-state could not be captured
    pub state_after: Option<EnvironmentModels>,
    /// Outcome of the call
    pub result: ExecutionResult,
    /// Instructions executed by the call
    pub coverage: Coverage,
}

impl ConcreteExecutionResult {
    /// Result for an invocation that never produced an after-state
    #[must_use]
    pub fn missing_state(result: ExecutionResult) -> Self {
        Self {
            state_after: None,
            result,
            coverage: Coverage::default(),
        }
    }

    /// Result reported when the worker process died mid-invocation
    #[must_use]
    pub fn process_death(message: impl Into<String>) -> Self {
        Self::missing_state(ExecutionResult::failure(
            FailureKind::ProcessDeath,
            FailureCause::new("$ProcessDeath", message),
        ))
    }
}
