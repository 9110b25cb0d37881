//! Operation orchestrator
//!
//! Drives the guarded, timed actions (connect, deploy, mutate, read, submit)
//! for both chains and keeps their `OperationState`s consistent:
//! - Every action pairs exactly one timer start with one stop, on every exit path
//! - Overlapping invocations of the same action on the same chain are rejected
//! - Collaborator failures are classified, logged and surfaced, never propagated

mod engine;
mod guard;
pub mod validate;

pub use engine::{
    ActionOutcome, ActionSummary, Connected, Deployed, Mutated, Orchestrator, ReadState,
    Submitted, TimerSnapshot,
};

use crate::chain::ContractKind;

use serde::{Serialize, Serializer};
use std::fmt;

/// A user-triggerable action; the unit of timing and reentrancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Connect,
    Deploy(ContractKind),
    /// Any state-changing call on the contract
    Mutate(ContractKind),
    Read(ContractKind),
    Submit,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Connect => write!(f, "connect"),
            ActionKind::Deploy(c) => write!(f, "deploy {}", c),
            ActionKind::Mutate(c) => write!(f, "mutate {}", c),
            ActionKind::Read(c) => write!(f, "read {}", c),
            ActionKind::Submit => write!(f, "submit"),
        }
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(ActionKind::Connect.to_string(), "connect");
        assert_eq!(
            ActionKind::Deploy(ContractKind::MessageStorage).to_string(),
            "deploy message"
        );
        assert_eq!(
            serde_json::to_value(ActionKind::Mutate(ContractKind::Counter)).unwrap(),
            "mutate counter"
        );
    }
}
