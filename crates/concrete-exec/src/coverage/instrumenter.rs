//! Load-time class transform: instruction numbering, mock slots and
//! coverage accumulation.

use super::{ClassCoverage, InstructionId, TraceEntry};
use crate::model::ClassId;
use crate::runtime::ClassDef;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Instrumentation data of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInstrumentation {
    /// Index assigned at load time, unique per worker
    pub class_index: u32,
    /// Number of numbered instructions in the class
    pub instructions_count: u32,
    method_offsets: HashMap<String, u32>,
    /// Signatures of methods whose calls consult the mock registry
    mock_slots: BTreeSet<String>,
}

impl ClassInstrumentation {
    /// Offset of a method's first instruction within the class
    #[must_use]
    pub fn method_offset(&self, signature: &str) -> Option<u32> {
        self.method_offsets.get(signature).copied()
    }

    /// Whether calls of the method are redirected through the mock registry
    #[must_use]
    pub fn has_mock_slot(&self, signature: &str) -> bool {
        self.mock_slots.contains(signature)
    }
}

/// Assigns instruction ids to user classes and accumulates their coverage
#[derive(Debug, Default)]
pub struct Instrumenter {
    classes: HashMap<ClassId, ClassInstrumentation>,
    names: Vec<ClassId>,
    covered: HashMap<u32, BTreeSet<InstructionId>>,
}

impl Instrumenter {
    /// Create an instrumenter with no classes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instrument a class. Built-in `std` classes are left untouched.
    pub fn instrument(&mut self, class: &ClassDef) -> Option<&ClassInstrumentation> {
        if class.name.is_std() {
            return None;
        }
        if !self.classes.contains_key(&class.name) {
            let class_index = self.names.len() as u32;
            let mut offset = 0u32;
            let mut method_offsets = HashMap::new();
            let mut mock_slots = BTreeSet::new();
            for method in &class.methods {
                let signature = method.signature();
                method_offsets.insert(signature.clone(), offset);
                offset += method.instructions.len() as u32;
                if !method.is_constructor() && !method.is_abstract() {
                    mock_slots.insert(signature);
                }
            }
            debug!(class = %class.name, class_index, instructions = offset, "instrumented class");
            self.names.push(class.name.clone());
            self.classes.insert(
                class.name.clone(),
                ClassInstrumentation {
                    class_index,
                    instructions_count: offset,
                    method_offsets,
                    mock_slots,
                },
            );
        }
        self.classes.get(&class.name)
    }

    /// Instrumentation of a loaded class
    #[must_use]
    pub fn get(&self, class: &ClassId) -> Option<&ClassInstrumentation> {
        self.classes.get(class)
    }

    /// Total instruction count of a class
    #[must_use]
    pub fn instructions_count(&self, class: &ClassId) -> Option<u64> {
        self.classes
            .get(class)
            .map(|c| u64::from(c.instructions_count))
    }

    /// Fold an invocation trace into the accumulated coverage
    pub fn accumulate(&mut self, entries: &[TraceEntry]) {
        for entry in entries {
            self.covered
                .entry(entry.instruction.class_index())
                .or_default()
                .insert(entry.instruction);
        }
    }

    /// Accumulated coverage of a class
    #[must_use]
    pub fn coverage_of(&self, class: &ClassId) -> Option<ClassCoverage> {
        let info = self.classes.get(class)?;
        let covered = self
            .covered
            .get(&info.class_index)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        Some(ClassCoverage {
            class_id: class.clone(),
            covered,
            instructions_count: u64::from(info.instructions_count),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coverage::InstructionKind;
    use crate::runtime::{MethodDef, Value};

    fn calc() -> ClassDef {
        ClassDef::class("samples.Calc")
            .with_method(
                MethodDef::new("add", vec!["int".into()], "int")
                    .with_instructions([InstructionKind::Plain, InstructionKind::Return])
                    .with_body(|_, _, _| Ok(Value::int(0))),
            )
            .with_method(
                MethodDef::new("sub", vec!["int".into()], "int")
                    .with_instructions([InstructionKind::Plain, InstructionKind::Plain, InstructionKind::Return])
                    .with_body(|_, _, _| Ok(Value::int(0))),
            )
            .with_method(MethodDef::new("abstractOne", vec![], "int"))
    }

    #[test]
    fn test_offsets_follow_declaration_order() {
        let mut instrumenter = Instrumenter::new();
        let info = instrumenter.instrument(&calc()).unwrap();
        assert_eq!(info.method_offset("add(int)int"), Some(0));
        assert_eq!(info.method_offset("sub(int)int"), Some(2));
        assert_eq!(info.instructions_count, 5);
        assert!(info.has_mock_slot("sub(int)int"));
        assert!(!info.has_mock_slot("abstractOne()int"));
    }

    #[test]
    fn test_std_classes_not_instrumented() {
        let mut instrumenter = Instrumenter::new();
        assert!(instrumenter.instrument(&ClassDef::class("std.Thing")).is_none());
    }

    #[test]
    fn test_accumulated_coverage() {
        let mut instrumenter = Instrumenter::new();
        instrumenter.instrument(&calc());
        let entry = |offset| TraceEntry {
            call_id: 1,
            instruction: InstructionId::new(0, offset),
            kind: InstructionKind::Plain,
        };
        instrumenter.accumulate(&[entry(0), entry(1)]);
        instrumenter.accumulate(&[entry(1), entry(3)]);
        let coverage = instrumenter.coverage_of(&ClassId::new("samples.Calc")).unwrap();
        assert_eq!(coverage.covered.len(), 3);
        assert_eq!(coverage.instructions_count, 5);
    }
}
