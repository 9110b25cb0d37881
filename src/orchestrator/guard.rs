//! Reentrancy guard for in-flight actions

use super::ActionKind;
use crate::chain::ChainKind;

use dashmap::DashSet;
use std::sync::Arc;

type Key = (ChainKind, ActionKind);

/// Tracks which (chain, action) pairs are currently in flight
#[derive(Clone, Default)]
pub struct ActionGuard {
    in_flight: Arc<DashSet<Key>>,
}

impl ActionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair, or `None` if another invocation holds it
    pub fn try_acquire(&self, chain: ChainKind, action: ActionKind) -> Option<ActionPermit> {
        let key = (chain, action);
        if self.in_flight.insert(key) {
            Some(ActionPermit {
                in_flight: self.in_flight.clone(),
                key,
            })
        } else {
            None
        }
    }
}

/// Releases its pair on drop
pub struct ActionPermit {
    in_flight: Arc<DashSet<Key>>,
    key: Key,
}

impl Drop for ActionPermit {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ContractKind;

    impl ActionGuard {
        pub(crate) fn is_in_flight(&self, chain: ChainKind, action: ActionKind) -> bool {
            self.in_flight.contains(&(chain, action))
        }
    }

    #[test]
    fn test_permit_is_exclusive_per_pair() {
        let guard = ActionGuard::new();
        let deploy = ActionKind::Deploy(ContractKind::Counter);

        let permit = guard.try_acquire(ChainKind::Bvm, deploy).unwrap();
        assert!(guard.try_acquire(ChainKind::Bvm, deploy).is_none());

        // Other chain and other action are independent
        assert!(guard.try_acquire(ChainKind::Evm, deploy).is_some());
        assert!(guard
            .try_acquire(ChainKind::Bvm, ActionKind::Deploy(ContractKind::MessageStorage))
            .is_some());

        drop(permit);
        assert!(!guard.is_in_flight(ChainKind::Bvm, deploy));
        assert!(guard.try_acquire(ChainKind::Bvm, deploy).is_some());
    }
}
