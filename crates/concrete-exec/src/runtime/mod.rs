//! Reference host runtime.
//!
//! A small managed object world that user programs are written against:
//! classes with native method bodies, a collected heap, static fields and
//! a sandbox. Everything the bridge needs from it is exposed through the
//! [`Introspection`] trait.

mod builtins;
mod class;
mod frame;
mod heap;
mod introspection;
mod loader;
mod machine;
mod sandbox;
mod value;

pub use class::{ClassDef, ClassKind, FieldDef, MethodBody, MethodDef, Visibility};
pub use frame::{Frame, Unwind};
pub use heap::{Heap, HeapObject, ObjectKind};
pub use introspection::{FieldInfo, Introspection, LambdaSpec};
pub use loader::{ClassPath, ProgramCatalog};
pub use machine::{Machine, ResolvedMethod, THROWABLE, THROWABLE_MESSAGE};
pub use sandbox::{Permission, SandboxPolicy};
pub use value::{ObjectId, Value};

pub(crate) use builtins::WRAPPERS;

/// Name prefix of dynamic proxy classes
pub const PROXY_CLASS_PREFIX: &str = "$Proxy";
/// Infix marking synthetic lambda classes
pub const LAMBDA_CLASS_MARKER: &str = "$$Lambda$";
