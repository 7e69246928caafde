//! The model ⇄ object bridge.
//!
//! [`ModelConstructor`] turns live objects into value models and
//! [`ValueConstructor`] turns models back into live objects. Both sides of
//! one invocation share an [`IdentityCache`], which is what lets an
//! unmodified object keep its handle between the before and after states.

mod cache;
mod custom;
mod model;
mod value;

pub use cache::{HandleGenerator, IdentityCache};
pub use custom::{CustomConstructors, CustomModelConstructor, ObjectView};
pub use model::ModelConstructor;
pub use value::{BuiltState, MockInstallation, ValueConstructor};

/// Which composites get their fields expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionStrategy {
    /// Expand every composite within the depth budget
    #[default]
    Always,
    /// Expand user classes and objects already known to the session;
    /// anything else becomes an empty-field composite
    UserClassesOrCached,
}
