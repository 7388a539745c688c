//! Debugger worker state machine (spec.md §3, §4.5).

use strum::Display;

/// The debugger worker's state. Transitions are driven exclusively by the
/// worker thread (spec.md §4.5): no other thread ever writes this value.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum DebuggerState {
    Detached,
    Attached,
    Running,
    Paused,
    Stepping,
    BreakpointHit,
    Exception,
}

impl DebuggerState {
    /// Whether `next` is a legal transition from `self`, per the transition
    /// table in spec.md §4.6. The worker calls this before committing a
    /// state change; an illegal transition is a logic error in the worker,
    /// not a condition callers are expected to probe defensively.
    pub fn can_transition_to(self, next: DebuggerState) -> bool {
        use DebuggerState::*;
        matches!(
            (self, next),
            (Detached, Attached)
                | (Attached, Running)
                | (Attached, Detached)
                | (Running, Paused)
                | (Running, BreakpointHit)
                | (Running, Exception)
                | (Running, Detached)
                | (Paused, Running)
                | (Paused, Stepping)
                | (Paused, Detached)
                | (Stepping, Paused)
                | (Stepping, Running)
                | (Stepping, BreakpointHit)
                | (Stepping, Exception)
                | (Stepping, Detached)
                | (BreakpointHit, Running)
                | (BreakpointHit, Paused)
                | (BreakpointHit, Stepping)
                | (BreakpointHit, Detached)
                | (Exception, Running)
                | (Exception, Paused)
                | (Exception, Detached)
        )
    }

    /// Whether the inferior is live (attached in any sub-state), used to
    /// gate commands that require a target (spec.md §4.5 edge cases).
    pub fn is_live(self) -> bool {
        !matches!(self, DebuggerState::Detached)
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, DebuggerState::Paused | DebuggerState::Stepping | DebuggerState::BreakpointHit | DebuggerState::Exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_only_goes_to_attached() {
        assert!(DebuggerState::Detached.can_transition_to(DebuggerState::Attached));
        assert!(!DebuggerState::Detached.can_transition_to(DebuggerState::Running));
    }

    #[test]
    fn any_stopped_state_can_detach() {
        assert!(DebuggerState::Paused.can_transition_to(DebuggerState::Detached));
        assert!(DebuggerState::BreakpointHit.can_transition_to(DebuggerState::Detached));
        assert!(DebuggerState::Exception.can_transition_to(DebuggerState::Detached));
    }

    #[test]
    fn running_cannot_jump_to_stepping_directly() {
        assert!(!DebuggerState::Running.can_transition_to(DebuggerState::Stepping));
    }

    #[test]
    fn is_live_and_is_stopped() {
        assert!(!DebuggerState::Detached.is_live());
        assert!(DebuggerState::Running.is_live());
        assert!(DebuggerState::Paused.is_stopped());
        assert!(!DebuggerState::Running.is_stopped());
    }
}
