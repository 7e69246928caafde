//! Instruction coverage: load-time instrumentation and per-invocation traces.
//!
//! User classes are instrumented when they load. Every declared instruction
//! gets a global [`InstructionId`] made of the class index and the offset
//! of the instruction within the class.

mod instrumenter;
mod trace;

pub use instrumenter::{ClassInstrumentation, Instrumenter};
pub use trace::{TraceEntry, TraceRecorder, DEFAULT_TRACE_CAPACITY};

use crate::model::ClassId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global instruction identifier (Poka-Yoke)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstructionId(u64);

impl InstructionId {
    /// Create an id from a class index and an offset within that class
    #[inline]
    #[must_use]
    pub const fn new(class_index: u32, offset: u32) -> Self {
        Self(((class_index as u64) << 32) | offset as u64)
    }

    /// Index of the declaring class
    #[inline]
    #[must_use]
    pub const fn class_index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Offset within the declaring class
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_index(), self.offset())
    }
}

/// What an instruction does, as far as failure classification cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstructionKind {
    /// Anything else
    #[default]
    Plain,
    /// Normal method exit
    Return,
    /// Deliberate throw site
    ExplicitThrow,
}

/// Coverage of one class accumulated since warmup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCoverage {
    /// Class reported on
    pub class_id: ClassId,
    /// Instructions executed at least once
    pub covered: Vec<InstructionId>,
    /// Instructions in the class
    pub instructions_count: u64,
}

impl ClassCoverage {
    /// Fraction of the class's instructions that were executed
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.instructions_count == 0 {
            return 0.0;
        }
        self.covered.len() as f64 / self.instructions_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_id_parts() {
        let id = InstructionId::new(3, 17);
        assert_eq!(id.class_index(), 3);
        assert_eq!(id.offset(), 17);
        assert_eq!(id.to_string(), "3:17");
        assert!(InstructionId::new(1, 99) < InstructionId::new(2, 0));
    }

    #[test]
    fn test_coverage_ratio() {
        let coverage = ClassCoverage {
            class_id: ClassId::new("samples.Calc"),
            covered: vec![InstructionId::new(0, 0), InstructionId::new(0, 1)],
            instructions_count: 8,
        };
        assert!((coverage.ratio() - 0.25).abs() < f64::EPSILON);
    }
}
