//! Per-chain operation state and its read-only snapshot

use crate::chain::{
    Balance, ChainKind, ContractHandle, ContractKind, ContractState, Credential, Identity,
    TransactionId, WalletSession,
};
use crate::timer::format_time;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// One deployed contract instance and its last decoded state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractSlot {
    pub handle: Option<ContractHandle>,
    pub state: Option<ContractState>,
    /// Set only right after a successful deploy or read-back
    pub fresh: bool,
}

impl ContractSlot {
    /// State that may be relied upon without re-reading the chain
    pub fn trusted_state(&self) -> Option<&ContractState> {
        if self.fresh {
            self.state.as_ref()
        } else {
            None
        }
    }
}

/// UI-visible progress of one chain's interaction lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct OperationState {
    pub connection: ConnectionStatus,
    /// Memory only; excluded from snapshots
    pub credential: Option<Credential>,
    pub identity: Option<Identity>,
    pub balance: Option<Balance>,
    pub last_transaction_id: Option<TransactionId>,
    pub message: ContractSlot,
    pub counter: ContractSlot,
    /// Last timer reading formatted as `HH:MM:SS.mmm`
    pub displayed_duration: String,
}

impl Default for OperationState {
    fn default() -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            credential: None,
            identity: None,
            balance: None,
            last_transaction_id: None,
            message: ContractSlot::default(),
            counter: ContractSlot::default(),
            displayed_duration: format_time(0),
        }
    }
}

impl OperationState {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionStatus::Connected
    }

    /// Wallet session for contract calls, if connected
    pub fn session(&self) -> Option<WalletSession> {
        match (&self.connection, &self.credential, &self.identity) {
            (ConnectionStatus::Connected, Some(credential), Some(identity)) => {
                Some(WalletSession {
                    credential: credential.clone(),
                    identity: identity.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn slot(&self, contract: ContractKind) -> &ContractSlot {
        match contract {
            ContractKind::MessageStorage => &self.message,
            ContractKind::Counter => &self.counter,
        }
    }

    pub fn slot_mut(&mut self, contract: ContractKind) -> &mut ContractSlot {
        match contract {
            ContractKind::MessageStorage => &mut self.message,
            ContractKind::Counter => &mut self.counter,
        }
    }

    pub fn snapshot(&self, chain: ChainKind, explorer_url: &str) -> OperationSnapshot {
        let link = |id: &TransactionId| format!("{}{}", explorer_url, id);

        let contract = |slot: &ContractSlot| ContractSnapshot {
            transaction_id: slot.handle.as_ref().map(|h| h.transaction_id.clone()),
            transaction_url: slot.handle.as_ref().map(|h| link(&h.transaction_id)),
            address: slot.handle.as_ref().and_then(|h| h.address.clone()),
            state: slot.state.clone(),
            fresh: slot.fresh,
        };

        OperationSnapshot {
            chain,
            connection: self.connection,
            address: self.identity.as_ref().map(|i| i.address.clone()),
            public_key: self.identity.as_ref().and_then(|i| i.public_key.clone()),
            balance: self.balance.map(|b| BalanceView {
                confirmed: b.confirmed.to_string(),
                unconfirmed: b.unconfirmed.to_string(),
                display: chain.format_amount(b.confirmed),
            }),
            last_transaction_id: self.last_transaction_id.clone(),
            last_transaction_url: self.last_transaction_id.as_ref().map(link),
            message: contract(&self.message),
            counter: contract(&self.counter),
            displayed_duration: self.displayed_duration.clone(),
        }
    }
}

/// Balance rendered for clients; base units as decimal strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub confirmed: String,
    pub unconfirmed: String,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractSnapshot {
    pub transaction_id: Option<TransactionId>,
    pub transaction_url: Option<String>,
    pub address: Option<String>,
    pub state: Option<ContractState>,
    pub fresh: bool,
}

/// Read-only view of an `OperationState`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSnapshot {
    pub chain: ChainKind,
    pub connection: ConnectionStatus,
    pub address: Option<String>,
    pub public_key: Option<String>,
    pub balance: Option<BalanceView>,
    pub last_transaction_id: Option<TransactionId>,
    pub last_transaction_url: Option<String>,
    pub message: ContractSnapshot,
    pub counter: ContractSnapshot,
    pub displayed_duration: String,
}
