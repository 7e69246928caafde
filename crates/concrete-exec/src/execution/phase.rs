//! Invocation phase tracking.

use crate::result::{ExecError, ExecResult};
use std::fmt;

/// Stage of one invocation inside a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationPhase {
    /// No invocation in flight
    #[default]
    Idle,
    /// Receiver, parameters and statics exist as live values
    ParamsBuilt,
    /// Static-method and new-instance mocks are installed
    MocksInstalled,
    /// The target is running under the watchdog
    Invoking,
    /// The target returned or threw
    Completed,
    /// The watchdog stopped the target
    TimedOut,
    /// The host failed while running the target
    Crashed,
    /// The outcome has been turned into models
    ResultConverted,
}

impl InvocationPhase {
    /// Whether `next` may follow this phase.
    ///
    /// Failures while building values or installing mocks skip straight to
    /// result conversion.
    #[must_use]
    pub const fn may_enter(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::ParamsBuilt | Self::ResultConverted)
                | (Self::ParamsBuilt, Self::MocksInstalled | Self::ResultConverted)
                | (Self::MocksInstalled, Self::Invoking | Self::ResultConverted)
                | (Self::Invoking, Self::Completed | Self::TimedOut | Self::Crashed)
                | (Self::Completed | Self::TimedOut | Self::Crashed, Self::ResultConverted)
                | (Self::ResultConverted, Self::Idle)
        )
    }
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ParamsBuilt => "params-built",
            Self::MocksInstalled => "mocks-installed",
            Self::Invoking => "invoking",
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
            Self::Crashed => "crashed",
            Self::ResultConverted => "result-converted",
        };
        f.write_str(name)
    }
}

/// Enforces the invocation state machine
#[derive(Debug, Default)]
pub struct PhaseTracker {
    current: InvocationPhase,
}

impl PhaseTracker {
    /// Tracker in [`InvocationPhase::Idle`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    #[must_use]
    pub const fn current(&self) -> InvocationPhase {
        self.current
    }

    /// Move to `next`; an illegal transition means the worker state can no
    /// longer be trusted
    pub fn enter(&mut self, next: InvocationPhase) -> ExecResult<()> {
        if !self.current.may_enter(next) {
            return Err(ExecError::poisoned(format!(
                "illegal invocation phase transition {} -> {next}",
                self.current
            )));
        }
        self.current = next;
        Ok(())
    }

    /// Return to idle from wherever the invocation stopped
    pub fn reset(&mut self) {
        self.current = InvocationPhase::Idle;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use InvocationPhase::*;

    #[test]
    fn test_full_cycle() {
        let mut tracker = PhaseTracker::new();
        for phase in [ParamsBuilt, MocksInstalled, Invoking, Completed, ResultConverted, Idle] {
            tracker.enter(phase).unwrap();
        }
        assert_eq!(tracker.current(), Idle);
    }

    #[test]
    fn test_build_failure_short_circuits() {
        let mut tracker = PhaseTracker::new();
        tracker.enter(ResultConverted).unwrap();
        tracker.enter(Idle).unwrap();
    }

    #[test]
    fn test_cannot_invoke_before_mocks() {
        let mut tracker = PhaseTracker::new();
        tracker.enter(ParamsBuilt).unwrap();
        let err = tracker.enter(Invoking).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("params-built -> invoking"));
    }

    #[test]
    fn test_terminal_states_convert() {
        assert!(TimedOut.may_enter(ResultConverted));
        assert!(Crashed.may_enter(ResultConverted));
        assert!(!Invoking.may_enter(ResultConverted));
        assert!(!Idle.may_enter(Invoking));
    }
}
