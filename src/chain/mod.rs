//! Chain module - collaborator interfaces and per-chain wiring
//!
//! This module provides:
//! - The Chain Operation Provider and Contract Client traits the orchestrator consumes
//! - Shared chain types (transaction ids, records, balances, contract state)
//! - Rejection classification for broadcast failures
//! - A simulated in-process ledger for both chain families
//! - An EVM JSON-RPC adapter backed by ethers

pub mod provider;
pub mod rejection;
pub mod sim;

pub use provider::{EvmContractClient, EvmRpcProvider};
pub use rejection::{classify, Disposition};
pub use sim::{SimulatedChain, SimulatedContractClient};

use crate::config::{Backend, ChainConfig};
use crate::error::ChainResult;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// The two chain families being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// UTXO-based virtual machine
    Bvm,
    /// Account-based virtual machine
    Evm,
}

impl ChainKind {
    pub const ALL: [ChainKind; 2] = [ChainKind::Bvm, ChainKind::Evm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Bvm => "bvm",
            ChainKind::Evm => "evm",
        }
    }

    /// Render a base-unit amount (satoshis / wei) for display
    pub fn format_amount(&self, amount: u128) -> String {
        match self {
            ChainKind::Bvm => format!("{} sat", amount),
            ChainKind::Evm => {
                let whole = amount / 1_000_000_000_000_000_000;
                let frac = amount % 1_000_000_000_000_000_000;
                let frac = format!("{:018}", frac);
                let frac = frac.trim_end_matches('0');
                if frac.is_empty() {
                    format!("{}.0", whole)
                } else {
                    format!("{}.{}", whole, frac)
                }
            }
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Bvm => write!(f, "BVM"),
            ChainKind::Evm => write!(f, "EVM"),
        }
    }
}

/// The two toy contracts deployed on each chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractKind {
    #[serde(rename = "message")]
    MessageStorage,
    #[serde(rename = "counter")]
    Counter,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::MessageStorage => "message",
            ContractKind::Counter => "counter",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque transaction reference, passed through to collaborators unmodified
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wallet secret. Held in memory only; never logged or serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Public identity derived from a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub address: String,
    pub public_key: Option<String>,
}

/// Wallet balance in base units (satoshis / wei)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub confirmed: u128,
    pub unconfirmed: u128,
}

/// Decoded contract state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractState {
    /// Message storage contract: raw byte string
    Message(Vec<u8>),
    /// Counter contract
    Counter(i64),
}

impl ContractState {
    pub fn message(text: &str) -> Self {
        ContractState::Message(text.as_bytes().to_vec())
    }

    pub fn kind(&self) -> ContractKind {
        match self {
            ContractState::Message(_) => ContractKind::MessageStorage,
            ContractState::Counter(_) => ContractKind::Counter,
        }
    }

    /// Human-readable value
    pub fn display_value(&self) -> String {
        match self {
            ContractState::Message(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ContractState::Counter(n) => n.to_string(),
        }
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_value())
    }
}

impl Serialize for ContractState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View {
            kind: ContractKind,
            value: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            hex: Option<String>,
        }

        let hex = match self {
            ContractState::Message(bytes) => Some(hex::encode(bytes)),
            ContractState::Counter(_) => None,
        };

        View {
            kind: self.kind(),
            value: self.display_value(),
            hex,
        }
        .serialize(serializer)
    }
}

/// A state-changing contract method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodCall {
    SetMessage(Vec<u8>),
    Increment,
    Decrement,
}

impl MethodCall {
    /// Contract method invoked on each chain
    pub fn method_name(&self, chain: ChainKind) -> &'static str {
        match (self, chain) {
            (MethodCall::SetMessage(_), ChainKind::Bvm) => "setMessage",
            (MethodCall::SetMessage(_), ChainKind::Evm) => "updateMessage",
            (MethodCall::Increment, _) => "increment",
            (MethodCall::Decrement, _) => "decrement",
        }
    }

    pub fn contract_kind(&self) -> ContractKind {
        match self {
            MethodCall::SetMessage(_) => ContractKind::MessageStorage,
            MethodCall::Increment | MethodCall::Decrement => ContractKind::Counter,
        }
    }

    /// State after applying this call to `current`
    pub fn apply(&self, current: &ContractState) -> Result<ContractState, String> {
        match (self, current) {
            (MethodCall::SetMessage(bytes), ContractState::Message(_)) => {
                Ok(ContractState::Message(bytes.clone()))
            }
            (MethodCall::Increment, ContractState::Counter(n)) => n
                .checked_add(1)
                .map(ContractState::Counter)
                .ok_or_else(|| "counter overflow".to_string()),
            (MethodCall::Decrement, ContractState::Counter(n)) => n
                .checked_sub(1)
                .map(ContractState::Counter)
                .ok_or_else(|| "counter underflow".to_string()),
            (call, state) => Err(format!(
                "{:?} does not apply to a {} contract",
                call,
                state.kind()
            )),
        }
    }
}

/// One transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u128,
    pub script: Vec<u8>,
}

/// A transaction as persisted by the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub block_height: Option<u64>,
    /// Call target (account model)
    pub to: Option<String>,
    /// Contract created by this transaction (account model)
    pub contract_address: Option<String>,
    /// Outputs (UTXO model)
    pub outputs: Vec<TxOutput>,
    pub input: Vec<u8>,
}

/// A connected wallet a contract client signs with
#[derive(Debug, Clone)]
pub struct WalletSession {
    pub credential: Credential,
    pub identity: Identity,
}

/// Location of a deployed contract instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractHandle {
    /// Latest transaction carrying the contract (current state UTXO on BVM)
    pub transaction_id: TransactionId,
    /// Contract account address (EVM)
    pub address: Option<String>,
}

/// Result of a contract deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub transaction_id: TransactionId,
    pub address: Option<String>,
}

/// Submits, fetches and accounts for transactions on one chain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainOperationProvider: Send + Sync {
    /// Derive the public identity for a wallet credential
    async fn resolve_identity(&self, credential: &Credential) -> ChainResult<Identity>;

    /// Broadcast a raw (signed) payload
    async fn submit_transaction(&self, raw_hex: &str) -> ChainResult<TransactionId>;

    async fn fetch_transaction(&self, id: &TransactionId) -> ChainResult<TransactionRecord>;

    async fn get_balance(&self, address: &str) -> ChainResult<Balance>;
}

/// Constructs, deploys and invokes one stateful contract kind on one chain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContractClient: Send + Sync {
    async fn deploy(
        &self,
        session: &WalletSession,
        initial: &ContractState,
        funding: u64,
    ) -> ChainResult<Deployment>;

    async fn invoke(
        &self,
        session: &WalletSession,
        contract: &ContractHandle,
        call: &MethodCall,
    ) -> ChainResult<TransactionId>;

    /// Decode contract state persisted by `record` at `output_index`
    async fn decode_state_from_transaction(
        &self,
        record: &TransactionRecord,
        output_index: usize,
    ) -> ChainResult<ContractState>;
}

/// Collaborators for one chain, injected into the orchestrator
#[derive(Clone)]
pub struct ChainHandles {
    pub kind: ChainKind,
    pub provider: Arc<dyn ChainOperationProvider>,
    pub message_client: Arc<dyn ContractClient>,
    pub counter_client: Arc<dyn ContractClient>,
    /// Transaction explorer prefix, the tx id is appended
    pub explorer_url: String,
    /// Amount locked into a newly deployed contract
    pub deploy_funding: u64,
}

impl ChainHandles {
    /// Wire the configured backend for a chain
    pub async fn build(kind: ChainKind, config: &ChainConfig) -> anyhow::Result<Self> {
        let handles = match config.backend {
            Backend::Simulated => {
                let chain = Arc::new(SimulatedChain::new(kind, config.simulated.clone()));
                info!(
                    "Chain {} using simulated ledger (latency {}ms)",
                    kind, config.simulated.latency_ms
                );
                Self::simulated(kind, chain, &config.explorer_url, config.deploy_funding)
            }
            Backend::Rpc => {
                if kind == ChainKind::Bvm {
                    bail!("BVM has no RPC backend; its contracts are built by the external SDK");
                }
                let rpc = config
                    .rpc
                    .as_ref()
                    .context("EVM rpc backend selected without [chains.evm.rpc] settings")?;

                let provider = Arc::new(EvmRpcProvider::new(rpc).await?);
                let message_client = Arc::new(
                    EvmContractClient::from_artifact(
                        ContractKind::MessageStorage,
                        provider.clone(),
                        &rpc.message_artifact,
                    )
                    .with_context(|| "Failed to load message storage artifact")?,
                );
                let counter_client = Arc::new(
                    EvmContractClient::from_artifact(
                        ContractKind::Counter,
                        provider.clone(),
                        &rpc.counter_artifact,
                    )
                    .with_context(|| "Failed to load counter artifact")?,
                );
                info!("Chain {} using JSON-RPC at {}", kind, rpc.url);

                Self {
                    kind,
                    provider,
                    message_client,
                    counter_client,
                    explorer_url: config.explorer_url.clone(),
                    deploy_funding: config.deploy_funding,
                }
            }
        };

        Ok(handles)
    }

    /// Handles backed by one simulated ledger
    pub fn simulated(
        kind: ChainKind,
        chain: Arc<SimulatedChain>,
        explorer_url: &str,
        deploy_funding: u64,
    ) -> Self {
        Self {
            kind,
            provider: chain.clone(),
            message_client: Arc::new(SimulatedContractClient::new(
                chain.clone(),
                ContractKind::MessageStorage,
            )),
            counter_client: Arc::new(SimulatedContractClient::new(chain, ContractKind::Counter)),
            explorer_url: explorer_url.to_string(),
            deploy_funding,
        }
    }

    pub fn client(&self, contract: ContractKind) -> &Arc<dyn ContractClient> {
        match contract {
            ContractKind::MessageStorage => &self.message_client,
            ContractKind::Counter => &self.counter_client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(ChainKind::Bvm.format_amount(100), "100 sat");
        assert_eq!(ChainKind::Evm.format_amount(1_500_000_000_000_000_000), "1.5");
        assert_eq!(ChainKind::Evm.format_amount(2_000_000_000_000_000_000), "2.0");
        assert_eq!(ChainKind::Evm.format_amount(1), "0.000000000000000001");
    }

    #[test]
    fn test_method_call_apply() {
        let counter = ContractState::Counter(2);
        assert_eq!(
            MethodCall::Increment.apply(&counter),
            Ok(ContractState::Counter(3))
        );
        assert_eq!(
            MethodCall::Decrement.apply(&ContractState::Counter(0)),
            Ok(ContractState::Counter(-1))
        );
        assert!(MethodCall::Increment.apply(&ContractState::message("hi")).is_err());
        assert_eq!(
            MethodCall::SetMessage(b"new".to_vec()).apply(&ContractState::message("old")),
            Ok(ContractState::message("new"))
        );
    }

    #[test]
    fn test_method_names_per_chain() {
        let set = MethodCall::SetMessage(vec![]);
        assert_eq!(set.method_name(ChainKind::Bvm), "setMessage");
        assert_eq!(set.method_name(ChainKind::Evm), "updateMessage");
        assert_eq!(MethodCall::Increment.method_name(ChainKind::Evm), "increment");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("deadbeef");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
        assert_eq!(credential.expose(), "deadbeef");
    }

    #[test]
    fn test_contract_state_serializes_readably() {
        let json = serde_json::to_value(ContractState::message("hello")).unwrap();
        assert_eq!(json["kind"], "message");
        assert_eq!(json["value"], "hello");
        assert_eq!(json["hex"], "68656c6c6f");

        let json = serde_json::to_value(ContractState::Counter(3)).unwrap();
        assert_eq!(json["value"], "3");
        assert!(json.get("hex").is_none());
    }
}
