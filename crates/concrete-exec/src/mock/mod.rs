//! Mock registry: canned method return values and fabricated instances.
//!
//! Every installation hands back a [`MockController`]; closing it removes
//! exactly the entries it added. The registry lives in the worker's
//! execution context and is emptied after every invocation.

mod registry;

pub use registry::{ControllerId, MockController, MockRegistry};
