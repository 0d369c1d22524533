//! Element instance lifecycle and the mutable runtime record.

use serde::{Deserialize, Serialize};

use super::element::ElementKind;

/// Lifecycle state of an element instance.
///
/// Legal transitions: `Activating → Activated → Completing → Completed`,
/// and from any non-terminal state `→ Terminating → Terminated`. Everything
/// else is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Activating,
    Activated,
    Completing,
    Completed,
    Terminating,
    Terminated,
}

impl Lifecycle {
    /// Terminal states; an instance never observes two terminal
    /// transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Completed | Lifecycle::Terminated)
    }

    /// Whether the requested transition is legal from this state.
    pub fn can_transition_to(self, to: Lifecycle) -> bool {
        match to {
            Lifecycle::Activating => false,
            Lifecycle::Activated => self == Lifecycle::Activating,
            Lifecycle::Completing => self == Lifecycle::Activated,
            Lifecycle::Completed => self == Lifecycle::Completing,
            Lifecycle::Terminating => !self.is_terminal() && self != Lifecycle::Terminating,
            Lifecycle::Terminated => self == Lifecycle::Terminating,
        }
    }
}

/// One runtime occurrence of a node in the process graph.
///
/// Created when its `ElementActivating` record is applied; mutated only by
/// applying records; removed when a terminal record is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInstance {
    /// Identity key, unique per occurrence
    pub key: u64,

    /// Id of the executable element this instance runs
    pub element_id: String,

    /// Static kind of the element
    pub kind: ElementKind,

    /// Current lifecycle state
    pub state: Lifecycle,

    /// Key of the enclosing container instance (0 for a root process)
    pub flow_scope_key: u64,

    /// Key of the owning process instance (its own key for a process)
    pub process_instance_key: u64,

    /// Key of the deployed definition the element belongs to
    pub process_definition_key: u64,

    /// Nonzero only for child processes spawned by a call activity
    pub parent_process_instance_key: u64,

    /// Key of the invoking call activity instance (0 otherwise)
    pub parent_element_instance_key: u64,

    /// Number of direct children in a non-terminal state.
    ///
    /// The single source of truth for "any children left".
    pub active_children: u32,

    /// 1-based loop counter for multi-instance children (0 otherwise)
    pub loop_counter: u32,

    /// Set when an interrupting event fired in this scope
    pub interrupted: bool,

    /// Key of the process instance spawned by this call activity (0
    /// otherwise)
    pub called_child_key: u64,
}

impl ElementInstance {
    pub fn is_terminating(&self) -> bool {
        self.state == Lifecycle::Terminating
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether this instance still counts against its parent's
    /// active-child counter.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Lifecycle::Activating.can_transition_to(Lifecycle::Activated));
        assert!(Lifecycle::Activated.can_transition_to(Lifecycle::Completing));
        assert!(Lifecycle::Completing.can_transition_to(Lifecycle::Completed));
    }

    #[test]
    fn test_terminating_reachable_from_any_non_terminal() {
        for state in [
            Lifecycle::Activating,
            Lifecycle::Activated,
            Lifecycle::Completing,
        ] {
            assert!(state.can_transition_to(Lifecycle::Terminating), "{state:?}");
        }
        assert!(Lifecycle::Terminating.can_transition_to(Lifecycle::Terminated));
    }

    #[test]
    fn test_terminal_states_are_dead_ends() {
        for state in [Lifecycle::Completed, Lifecycle::Terminated] {
            for to in [
                Lifecycle::Activating,
                Lifecycle::Activated,
                Lifecycle::Completing,
                Lifecycle::Completed,
                Lifecycle::Terminating,
                Lifecycle::Terminated,
            ] {
                assert!(!state.can_transition_to(to), "{state:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!Lifecycle::Activating.can_transition_to(Lifecycle::Completing));
        assert!(!Lifecycle::Activated.can_transition_to(Lifecycle::Completed));
        assert!(!Lifecycle::Activating.can_transition_to(Lifecycle::Terminated));
    }
}
