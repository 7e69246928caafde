//! concrete-exec: model ⇄ object bridge and crash-isolated execution engine
//!
//! A test generator describes program states as serializable value models.
//! This crate turns those models into live objects inside a worker, invokes
//! one method or constructor under a watchdog and sandbox, and turns the
//! resulting state, outcome and coverage back into models.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐   frames    ┌──────────────────────────────┐
//! │ ConcreteExecutorPool   │────────────►│ worker: serve()              │
//! │  └ ConcreteExecutor    │  (bincode)  │  └ ExecutionContext          │
//! │     └ WorkerClient     │◄────────────│     ├ ValueConstructor       │
//! └────────────────────────┘             │     ├ MockRegistry           │
//!                                        │     ├ Machine (host runtime) │
//!                                        │     └ ModelConstructor       │
//!                                        └──────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod config;
pub mod construct;
pub mod coverage;
pub mod execution;
pub mod logging;
pub mod mock;
pub mod model;
pub mod protocol;
mod result;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::{ExecutorConfig, InstrumentationSpec};
pub use construct::{
    CustomConstructors, CustomModelConstructor, ExpansionStrategy, IdentityCache, ModelConstructor,
    ValueConstructor,
};
pub use coverage::{ClassCoverage, InstructionId, InstructionKind};
pub use execution::{ExecutionContext, InvocationPhase};
pub use logging::LogFormat;
pub use mock::{MockController, MockRegistry};
pub use model::{
    ClassId, ConcreteExecutionData, ConcreteExecutionResult, EnvironmentModels, ExecutableRef,
    ExecutionResult, FailureKind, FieldRef, Handle, Model,
};
pub use protocol::{
    ConcreteExecutor, ConcreteExecutorPool, InProcessLauncher, ProcessLauncher, WorkerLauncher,
};
pub use result::{ExecError, ExecResult};
pub use runtime::{Machine, ProgramCatalog};
