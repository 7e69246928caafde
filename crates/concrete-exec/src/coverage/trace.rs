//! Bounded per-invocation trace of executed instructions.

use super::{InstructionId, InstructionKind};
use tracing::warn;

/// Default trace buffer capacity
pub const DEFAULT_TRACE_CAPACITY: usize = 65_536;

/// One executed instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Identifier of the method activation that executed the instruction
    pub call_id: u64,
    /// Executed instruction
    pub instruction: InstructionId,
    /// Its kind
    pub kind: InstructionKind,
}

/// Records `(call id, instruction)` pairs up to a fixed capacity.
///
/// The most recent instruction is tracked even past capacity, so failure
/// classification sees where execution really stopped.
#[derive(Debug)]
pub struct TraceRecorder {
    entries: Vec<TraceEntry>,
    last: Option<TraceEntry>,
    capacity: usize,
    next_call_id: u64,
    overflowed: bool,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl TraceRecorder {
    /// Create a recorder holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            last: None,
            capacity,
            next_call_id: 0,
            overflowed: false,
        }
    }

    /// Change the capacity; takes effect after the next reset
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Start a new method activation and return its call id
    pub fn enter_call(&mut self) -> u64 {
        self.next_call_id += 1;
        self.next_call_id
    }

    /// Record an executed instruction; entries past capacity are dropped
    pub fn record(&mut self, call_id: u64, instruction: InstructionId, kind: InstructionKind) {
        let entry = TraceEntry {
            call_id,
            instruction,
            kind,
        };
        self.last = Some(entry);
        if self.entries.len() >= self.capacity {
            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    capacity = self.capacity,
                    "trace buffer full, dropping further instructions"
                );
            }
            return;
        }
        self.entries.push(entry);
    }

    /// Recorded entries in execution order
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Instruction ids in execution order
    #[must_use]
    pub fn instructions(&self) -> Vec<InstructionId> {
        self.entries.iter().map(|e| e.instruction).collect()
    }

    /// Whether entries were dropped since the last reset
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Whether the last executed instruction ran in a different activation
    /// than the first one
    #[must_use]
    pub fn ended_in_nested_call(&self) -> bool {
        match (self.entries.first(), self.last) {
            (Some(first), Some(last)) => first.call_id != last.call_id,
            _ => false,
        }
    }

    /// Kind of the last executed instruction, recorded or not
    #[must_use]
    pub fn last_kind(&self) -> Option<InstructionKind> {
        self.last.map(|e| e.kind)
    }

    /// Clear entries and call ids
    pub fn reset(&mut self) {
        self.entries.clear();
        self.last = None;
        self.next_call_id = 0;
        self.overflowed = false;
    }
}
