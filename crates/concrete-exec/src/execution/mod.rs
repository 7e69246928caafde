//! The execution orchestrator that runs inside a worker.
//!
//! One [`ExecutionContext`] per worker process. Each invocation walks the
//! [`InvocationPhase`] state machine: build values, install mocks, call
//! the target under a [`Watchdog`], convert the outcome.

mod context;
mod phase;
mod watchdog;

pub use context::{ExecutionContext, DEFAULT_INTERRUPT_GRACE};
pub use phase::{InvocationPhase, PhaseTracker};
pub use watchdog::{UnresponsiveHook, Watchdog};
