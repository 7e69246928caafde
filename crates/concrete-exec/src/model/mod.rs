//! Value model: serializable, host-agnostic descriptions of runtime values,
//! statements and state snapshots.
//!
//! Models are immutable once published. The only mutation ever performed is
//! appending an assemble model's modification chain while it is built.

mod environment;
mod ids;
mod statement;
mod value;

#[cfg(feature = "proptest")]
pub mod strategies;

pub use environment::{
    ConcreteExecutionData, ConcreteExecutionResult, Coverage, EnvironmentModels,
    ExecutionFailure, ExecutionResult, FailureCause, FailureKind,
};
pub(crate) use ids::signature_of;
pub use ids::{ClassId, ConstructorRef, ExecutableRef, FieldRef, Handle, MethodRef};
pub use statement::{
    DirectFieldGet, DirectFieldSet, ExecutableCall, Instrumentation, StatementModel,
};
pub use value::{
    ArrayModel, AssembleModel, CompositeModel, LambdaModel, Model, PrimitiveValue,
};
