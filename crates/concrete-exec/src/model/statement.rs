//! Statement models and mocking instructions.

use super::ids::{ClassId, ExecutableRef, FieldRef, MethodRef};
use super::value::Model;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Call of a method or constructor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableCall {
    /// Receiver, `None` for static methods and constructors
    pub instance: Option<Box<Model>>,
    /// Method or constructor to call
    pub executable: ExecutableRef,
    /// Arguments
    pub params: Vec<Model>,
}

impl ExecutableCall {
    /// Static call or constructor invocation
    #[must_use]
    pub fn new(executable: impl Into<ExecutableRef>, params: Vec<Model>) -> Self {
        Self {
            instance: None,
            executable: executable.into(),
            params,
        }
    }

    /// Call on a receiver
    #[must_use]
    pub fn on(instance: Model, executable: impl Into<ExecutableRef>, params: Vec<Model>) -> Self {
        Self {
            instance: Some(Box::new(instance)),
            executable: executable.into(),
            params,
        }
    }

    pub(crate) fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Model)) {
        if let Some(instance) = &self.instance {
            instance.walk(visit);
        }
        for param in &self.params {
            param.walk(visit);
        }
    }
}

/// Write a field directly, bypassing setters and visibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectFieldSet {
    /// Object written to
    pub instance: Model,
    /// Field written
    pub field: FieldRef,
    /// New value
    pub value: Model,
}

/// Read a field directly, bypassing getters and visibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectFieldGet {
    /// Object read from
    pub instance: Model,
    /// Field read
    pub field: FieldRef,
}

/// One step of an assemble model's modification chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementModel {
    /// Method or constructor call
    Call(ExecutableCall),
    /// Direct field write
    FieldSet(DirectFieldSet),
    /// Direct field read
    FieldGet(DirectFieldGet),
}

impl StatementModel {
    pub(crate) fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Model)) {
        match self {
            Self::Call(call) => call.walk(visit),
            Self::FieldSet(set) => {
                set.instance.walk(visit);
                set.value.walk(visit);
            }
            Self::FieldGet(get) => get.instance.walk(visit),
        }
    }
}

impl From<ExecutableCall> for StatementModel {
    fn from(call: ExecutableCall) -> Self {
        Self::Call(call)
    }
}

impl From<DirectFieldSet> for StatementModel {
    fn from(set: DirectFieldSet) -> Self {
        Self::FieldSet(set)
    }
}

/// Mocking instruction applied for the duration of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instrumentation {
    /// Allocations of `class_id` performed from one of `call_sites` yield the
    /// given instances in order instead of real objects
    NewInstance {
        /// Class whose allocations are replaced
        class_id: ClassId,
        /// Instances handed out, in order
        instances: Vec<Model>,
        /// Classes whose allocations are intercepted
        call_sites: BTreeSet<ClassId>,
    },
    /// Calls of a static method return the given values in order
    StaticMethod {
        /// Mocked method
        method: MethodRef,
        /// Return values, in order
        values: Vec<Model>,
    },
}
