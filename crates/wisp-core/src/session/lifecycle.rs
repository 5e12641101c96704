//! Session lifecycle states.

use std::fmt;

use crate::error::{Result, SessionError};

/// Where a session is in its life.
///
/// Transitions only move forward, except that a suspended session may become
/// active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LifecycleState {
    #[default]
    Constructing,
    Active,
    Suspended,
    Quitting,
    Destroyed,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::{Active, Constructing, Destroyed, Quitting, Suspended};
        matches!(
            (self, next),
            (Constructing, Active | Quitting | Destroyed)
                | (Active, Suspended | Quitting | Destroyed)
                | (Suspended, Active | Quitting | Destroyed)
                | (Quitting, Destroyed)
        )
    }

    /// Moves to `next`, failing with `InvalidState` on a backward transition.
    pub fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(SessionError::invalid_state(format!(
                "cannot go from {self} to {next}"
            )));
        }
        *self = next;
        Ok(())
    }

    /// Returns whether events are still delivered to the application.
    pub fn is_live(self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Suspended)
    }

    pub fn is_quitting(self) -> bool {
        self >= LifecycleState::Quitting
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Constructing => "constructing",
            LifecycleState::Active => "active",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Quitting => "quitting",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_and_resume() {
        let mut state = LifecycleState::Constructing;
        state.transition(LifecycleState::Active).unwrap();
        state.transition(LifecycleState::Suspended).unwrap();
        state.transition(LifecycleState::Active).unwrap();
        assert!(state.is_live());
    }

    #[test]
    fn test_no_way_back_from_quitting() {
        let mut state = LifecycleState::Active;
        state.transition(LifecycleState::Quitting).unwrap();
        assert!(state.transition(LifecycleState::Active).is_err());
        assert_eq!(state, LifecycleState::Quitting);
        state.transition(LifecycleState::Destroyed).unwrap();
        assert!(state.transition(LifecycleState::Destroyed).is_err());
    }

    #[test]
    fn test_constructing_cannot_suspend() {
        assert!(!LifecycleState::Constructing.can_transition_to(LifecycleState::Suspended));
        assert!(LifecycleState::Constructing.can_transition_to(LifecycleState::Destroyed));
    }
}
