//! Simulated in-process ledger for both chain families
//!
//! The BVM flavour is UTXO-based: contract state lives in the locking script
//! of output 0 and every mutation spends the previous state output. The EVM
//! flavour is account-based: contracts live at an address and their storage
//! history is kept per block height. Latency and fees are configurable so the
//! timing bracket measures something meaningful without a network.

use super::{
    Balance, ChainKind, ChainOperationProvider, ContractClient, ContractHandle, ContractKind,
    ContractState, Credential, Deployment, Identity, MethodCall, TransactionId, TransactionRecord,
    TxOutput, WalletSession,
};
use crate::config::SimulatedConfig;
use crate::error::{ChainError, ChainResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Prefix of an encoded contract state script
const STATE_MAGIC: &[u8; 4] = b"VMST";
const TAG_MESSAGE: u8 = 0;
const TAG_COUNTER: u8 = 1;
/// Largest amount a single output or a whole transaction may carry
pub const MAX_MONEY: u128 = 21_000_000 * 100_000_000;

/// Encode contract state as a state script
pub fn encode_state(state: &ContractState) -> Vec<u8> {
    let mut script = STATE_MAGIC.to_vec();
    match state {
        ContractState::Message(bytes) => {
            script.push(TAG_MESSAGE);
            script.extend_from_slice(bytes);
        }
        ContractState::Counter(n) => {
            script.push(TAG_COUNTER);
            script.extend_from_slice(&n.to_be_bytes());
        }
    }
    script
}

/// Decode a state script produced by `encode_state`
pub fn decode_state(script: &[u8]) -> ChainResult<ContractState> {
    let body = script
        .strip_prefix(STATE_MAGIC.as_slice())
        .ok_or_else(|| ChainError::Decode("output does not carry contract state".to_string()))?;

    match body.split_first() {
        Some((&TAG_MESSAGE, bytes)) => Ok(ContractState::Message(bytes.to_vec())),
        Some((&TAG_COUNTER, bytes)) => {
            let raw: [u8; 8] = bytes
                .try_into()
                .map_err(|_| ChainError::Decode("malformed counter state".to_string()))?;
            Ok(ContractState::Counter(i64::from_be_bytes(raw)))
        }
        _ => Err(ChainError::Decode("unknown contract state tag".to_string())),
    }
}

fn keccak_hex(bytes: &[u8]) -> String {
    hex::encode(Keccak256::digest(bytes))
}

/// Reference to a transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TransactionId,
    pub index: usize,
}

/// Contract operation carried by a simulated transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimCall {
    Deploy { script: Vec<u8> },
    Invoke(MethodCall),
}

/// Raw payload format accepted by `SimulatedChain::submit_transaction`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPayload {
    pub from: String,
    pub nonce: u64,
    #[serde(default)]
    pub inputs: Vec<OutPoint>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
    pub to: Option<String>,
    pub call: Option<SimCall>,
}

impl SimPayload {
    /// Hex encoding submitted to the ledger
    pub fn to_hex(&self) -> String {
        // Serializing plain data structs cannot fail
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }
}

#[derive(Default)]
struct Ledger {
    height: u64,
    balances: HashMap<String, u128>,
    nonces: HashMap<String, u64>,
    transactions: HashMap<TransactionId, TransactionRecord>,
    spent: HashSet<OutPoint>,
    /// Account model storage: address -> (height, state) history
    contracts: HashMap<String, Vec<(u64, ContractState)>>,
    /// Failure returned by the next submission
    pending_fault: Option<ChainError>,
}

/// In-process chain implementing the provider interface
pub struct SimulatedChain {
    kind: ChainKind,
    config: SimulatedConfig,
    ledger: RwLock<Ledger>,
}

impl SimulatedChain {
    pub fn new(kind: ChainKind, config: SimulatedConfig) -> Self {
        Self {
            kind,
            config,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    pub fn kind(&self) -> ChainKind {
        self.kind
    }

    async fn network_delay(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Make the next submission fail with `err`
    pub async fn inject_fault(&self, err: ChainError) {
        self.ledger.write().await.pending_fault = Some(err);
    }

    /// Next nonce a wallet should use
    pub async fn next_nonce(&self, address: &str) -> u64 {
        self.ledger
            .read()
            .await
            .nonces
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Contract storage as of block `height` (account model)
    pub async fn contract_state_at(
        &self,
        address: &str,
        height: u64,
    ) -> ChainResult<ContractState> {
        self.network_delay().await;
        let ledger = self.ledger.read().await;
        let history = ledger
            .contracts
            .get(address)
            .ok_or_else(|| ChainError::Decode(format!("no contract at {}", address)))?;

        history
            .iter()
            .rev()
            .find(|(h, _)| *h <= height)
            .map(|(_, state)| state.clone())
            .ok_or_else(|| {
                ChainError::Decode(format!("contract {} not deployed at block {}", address, height))
            })
    }

    fn derive_identity(&self, secret: &[u8]) -> Identity {
        let digest = Keccak256::digest(secret);
        match self.kind {
            ChainKind::Bvm => Identity {
                address: hex::encode(&digest[..20]),
                public_key: Some(format!("02{}", hex::encode(digest))),
            },
            ChainKind::Evm => Identity {
                address: format!("0x{}", hex::encode(&digest[12..])),
                public_key: None,
            },
        }
    }

    fn contract_address(from: &str, nonce: u64) -> String {
        let mut seed = from.as_bytes().to_vec();
        seed.extend_from_slice(&nonce.to_be_bytes());
        let digest = Keccak256::digest(&seed);
        format!("0x{}", hex::encode(&digest[12..]))
    }

    fn apply_utxo(
        &self,
        ledger: &mut Ledger,
        id: &TransactionId,
        payload: &SimPayload,
    ) -> Result<(), String> {
        if payload.outputs.is_empty() {
            return Err("16: bad-txns-vout-empty".to_string());
        }

        let unique: HashSet<_> = payload.inputs.iter().collect();
        if unique.len() != payload.inputs.len() {
            return Err("16: bad-txns-inputs-duplicate".to_string());
        }

        let mut input_value: u128 = 0;
        for input in &payload.inputs {
            let output = ledger
                .transactions
                .get(&input.txid)
                .and_then(|tx| tx.outputs.get(input.index))
                .ok_or_else(|| "16: bad-txns-inputs-missingorspent".to_string())?;
            if ledger.spent.contains(input) {
                return Err("16: bad-txns-inputs-missingorspent".to_string());
            }
            input_value = input_value
                .checked_add(output.value)
                .filter(|v| *v <= MAX_MONEY)
                .ok_or_else(|| "16: bad-txns-inputs-too-large".to_string())?;
        }

        let mut output_value: u128 = 0;
        for output in &payload.outputs {
            if output.value > MAX_MONEY {
                return Err("16: bad-txns-vout-toolarge".to_string());
            }
            output_value = output_value
                .checked_add(output.value)
                .filter(|v| *v <= MAX_MONEY)
                .ok_or_else(|| "16: bad-txns-txouttotal-toolarge".to_string())?;
        }
        let required = output_value
            .checked_add(u128::from(self.config.fee))
            .ok_or_else(|| "16: bad-txns-txouttotal-toolarge".to_string())?
            .saturating_sub(input_value);
        let balance = ledger.balances.get(&payload.from).copied().unwrap_or(0);
        if balance < required {
            return Err(format!(
                "insufficient funds: have {}, need {}",
                balance, required
            ));
        }

        ledger.balances.insert(payload.from.clone(), balance - required);
        for input in &payload.inputs {
            ledger.spent.insert(input.clone());
        }
        debug!("Simulated {} tx {} spends {} inputs", self.kind, id, payload.inputs.len());
        Ok(())
    }

    fn apply_account(
        &self,
        ledger: &mut Ledger,
        height: u64,
        payload: &SimPayload,
    ) -> Result<Option<String>, String> {
        let expected = ledger.nonces.get(&payload.from).copied().unwrap_or(0);
        if payload.nonce < expected {
            return Err("nonce too low".to_string());
        }
        let next_nonce = payload
            .nonce
            .checked_add(1)
            .ok_or_else(|| "nonce has max value".to_string())?;

        let balance = ledger.balances.get(&payload.from).copied().unwrap_or(0);
        let fee = u128::from(self.config.fee);
        if balance < fee {
            return Err("insufficient funds for gas * price + value".to_string());
        }

        let created = match &payload.call {
            Some(SimCall::Deploy { script }) => {
                let state = decode_state(script).map_err(|e| e.to_string())?;
                if matches!(state, ContractState::Counter(n) if n < 0) {
                    return Err("execution reverted: counter underflow".to_string());
                }
                let address = Self::contract_address(&payload.from, payload.nonce);
                ledger
                    .contracts
                    .insert(address.clone(), vec![(height, state)]);
                Some(address)
            }
            Some(SimCall::Invoke(call)) => {
                let target = payload
                    .to
                    .as_ref()
                    .ok_or_else(|| "execution reverted: missing call target".to_string())?;
                let history = ledger
                    .contracts
                    .get_mut(target)
                    .ok_or_else(|| "execution reverted: no contract code".to_string())?;
                let current = history
                    .last()
                    .map(|(_, s)| s.clone())
                    .ok_or_else(|| "execution reverted: empty storage".to_string())?;
                let next = call
                    .apply(&current)
                    .map_err(|e| format!("execution reverted: {}", e))?;
                if matches!(next, ContractState::Counter(n) if n < 0) {
                    return Err("execution reverted: counter underflow".to_string());
                }
                history.push((height, next));
                None
            }
            None => None,
        };

        ledger.balances.insert(payload.from.clone(), balance - fee);
        ledger.nonces.insert(payload.from.clone(), next_nonce);
        Ok(created)
    }
}

#[async_trait]
impl ChainOperationProvider for SimulatedChain {
    async fn resolve_identity(&self, credential: &Credential) -> ChainResult<Identity> {
        let secret = hex::decode(credential.expose())
            .map_err(|e| ChainError::Credential(format!("private key is not hex: {}", e)))?;
        if secret.len() != 32 {
            return Err(ChainError::Credential(
                "private key must be 32 bytes".to_string(),
            ));
        }

        self.network_delay().await;
        let identity = self.derive_identity(&secret);

        let mut ledger = self.ledger.write().await;
        ledger
            .balances
            .entry(identity.address.clone())
            .or_insert(u128::from(self.config.faucet_balance));

        Ok(identity)
    }

    async fn submit_transaction(&self, raw_hex: &str) -> ChainResult<TransactionId> {
        self.network_delay().await;

        let bytes = hex::decode(raw_hex).map_err(|_| ChainError::Rejected {
            message: "TX decode failed".to_string(),
            transaction_id: None,
        })?;
        let id = TransactionId::new(keccak_hex(&bytes));
        let reject = |message: String| ChainError::Rejected {
            message,
            transaction_id: Some(id.clone()),
        };

        if bytes.len() > self.config.max_tx_bytes {
            return Err(reject("64: bad-txns-oversize".to_string()));
        }
        let payload: SimPayload =
            serde_json::from_slice(&bytes).map_err(|_| reject("TX decode failed".to_string()))?;

        let mut ledger = self.ledger.write().await;
        if let Some(fault) = ledger.pending_fault.take() {
            return Err(fault);
        }
        if ledger.transactions.contains_key(&id) {
            return Err(reject("257: txn-already-known".to_string()));
        }

        let height = ledger.height + 1;
        let contract_address = match self.kind {
            ChainKind::Bvm => {
                let next_nonce = payload
                    .nonce
                    .checked_add(1)
                    .ok_or_else(|| reject("nonce has max value".to_string()))?;
                self.apply_utxo(&mut ledger, &id, &payload).map_err(reject)?;
                // Keep wallet payloads unique even when outputs repeat
                ledger.nonces.insert(payload.from.clone(), next_nonce);
                None
            }
            ChainKind::Evm => self
                .apply_account(&mut ledger, height, &payload)
                .map_err(reject)?,
        };

        let input = match &payload.call {
            Some(call) => serde_json::to_vec(call).unwrap_or_default(),
            None => Vec::new(),
        };

        ledger.height = height;
        ledger.transactions.insert(
            id.clone(),
            TransactionRecord {
                id: id.clone(),
                block_height: Some(height),
                to: payload.to.clone(),
                contract_address,
                outputs: payload.outputs.clone(),
                input,
            },
        );

        debug!("Simulated {} accepted tx {} at height {}", self.kind, id, height);
        Ok(id)
    }

    async fn fetch_transaction(&self, id: &TransactionId) -> ChainResult<TransactionRecord> {
        self.network_delay().await;
        self.ledger
            .read()
            .await
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(id.clone()))
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Balance> {
        self.network_delay().await;
        let confirmed = self
            .ledger
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(0);
        Ok(Balance {
            confirmed,
            unconfirmed: 0,
        })
    }
}

/// Contract client for one contract kind on a simulated chain
pub struct SimulatedContractClient {
    chain: Arc<SimulatedChain>,
    kind: ContractKind,
}

impl SimulatedContractClient {
    pub fn new(chain: Arc<SimulatedChain>, kind: ContractKind) -> Self {
        Self { chain, kind }
    }

    async fn resolve_address(&self, contract: &ContractHandle) -> ChainResult<String> {
        if let Some(address) = &contract.address {
            return Ok(address.clone());
        }
        let record = self.chain.fetch_transaction(&contract.transaction_id).await?;
        record
            .contract_address
            .or(record.to)
            .ok_or_else(|| ChainError::Invoke("transaction does not locate a contract".to_string()))
    }
}

#[async_trait]
impl ContractClient for SimulatedContractClient {
    async fn deploy(
        &self,
        session: &WalletSession,
        initial: &ContractState,
        funding: u64,
    ) -> ChainResult<Deployment> {
        if initial.kind() != self.kind {
            return Err(ChainError::Deploy(format!(
                "initial state does not fit a {} contract",
                self.kind
            )));
        }

        let from = session.identity.address.clone();
        let nonce = self.chain.next_nonce(&from).await;
        let script = encode_state(initial);

        let payload = match self.chain.kind() {
            ChainKind::Bvm => SimPayload {
                from,
                nonce,
                inputs: Vec::new(),
                outputs: vec![TxOutput {
                    value: u128::from(funding),
                    script,
                }],
                to: None,
                call: None,
            },
            ChainKind::Evm => SimPayload {
                from,
                nonce,
                inputs: Vec::new(),
                outputs: Vec::new(),
                to: None,
                call: Some(SimCall::Deploy { script }),
            },
        };

        let transaction_id = self.chain.submit_transaction(&payload.to_hex()).await?;
        let address = match self.chain.kind() {
            ChainKind::Bvm => None,
            ChainKind::Evm => {
                self.chain
                    .fetch_transaction(&transaction_id)
                    .await?
                    .contract_address
            }
        };

        Ok(Deployment {
            transaction_id,
            address,
        })
    }

    async fn invoke(
        &self,
        session: &WalletSession,
        contract: &ContractHandle,
        call: &MethodCall,
    ) -> ChainResult<TransactionId> {
        if call.contract_kind() != self.kind {
            return Err(ChainError::Invoke(format!(
                "{} is not a {} method",
                call.method_name(self.chain.kind()),
                self.kind
            )));
        }

        let from = session.identity.address.clone();
        let nonce = self.chain.next_nonce(&from).await;

        let payload = match self.chain.kind() {
            ChainKind::Bvm => {
                let previous = self.chain.fetch_transaction(&contract.transaction_id).await?;
                let output = previous.outputs.first().ok_or_else(|| {
                    ChainError::Invoke("previous transaction has no state output".to_string())
                })?;
                let current = decode_state(&output.script)?;
                let next = call.apply(&current).map_err(ChainError::Invoke)?;

                SimPayload {
                    from,
                    nonce,
                    inputs: vec![OutPoint {
                        txid: contract.transaction_id.clone(),
                        index: 0,
                    }],
                    // Contract value is carried forward unchanged
                    outputs: vec![TxOutput {
                        value: output.value,
                        script: encode_state(&next),
                    }],
                    to: None,
                    call: Some(SimCall::Invoke(call.clone())),
                }
            }
            ChainKind::Evm => SimPayload {
                from,
                nonce,
                inputs: Vec::new(),
                outputs: Vec::new(),
                to: Some(self.resolve_address(contract).await?),
                call: Some(SimCall::Invoke(call.clone())),
            },
        };

        self.chain.submit_transaction(&payload.to_hex()).await
    }

    async fn decode_state_from_transaction(
        &self,
        record: &TransactionRecord,
        output_index: usize,
    ) -> ChainResult<ContractState> {
        let state = match self.chain.kind() {
            ChainKind::Bvm => {
                let output = record.outputs.get(output_index).ok_or_else(|| {
                    ChainError::Decode(format!(
                        "transaction {} has no output {}",
                        record.id, output_index
                    ))
                })?;
                decode_state(&output.script)?
            }
            ChainKind::Evm => {
                let address = record
                    .contract_address
                    .as_ref()
                    .or(record.to.as_ref())
                    .ok_or_else(|| {
                        ChainError::Decode(format!("transaction {} touches no contract", record.id))
                    })?;
                let height = record.block_height.ok_or_else(|| {
                    ChainError::Decode(format!("transaction {} is not mined", record.id))
                })?;
                self.chain.contract_state_at(address, height).await?
            }
        };

        if state.kind() != self.kind {
            return Err(ChainError::Decode(format!(
                "expected {} state, found {}",
                self.kind,
                state.kind()
            )));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn chain(kind: ChainKind) -> Arc<SimulatedChain> {
        Arc::new(SimulatedChain::new(
            kind,
            SimulatedConfig {
                latency_ms: 0,
                faucet_balance: 10_000,
                fee: 1,
                max_tx_bytes: 100_000,
            },
        ))
    }

    async fn session(chain: &SimulatedChain) -> WalletSession {
        let credential = Credential::new(KEY);
        let identity = chain.resolve_identity(&credential).await.unwrap();
        WalletSession {
            credential,
            identity,
        }
    }

    #[test]
    fn test_state_script_encoding() {
        let message = ContractState::message("hello");
        assert_eq!(decode_state(&encode_state(&message)).unwrap(), message);
        assert_eq!(
            decode_state(&encode_state(&ContractState::Counter(-7))).unwrap(),
            ContractState::Counter(-7)
        );
        assert!(matches!(decode_state(b"junk"), Err(ChainError::Decode(_))));
        assert!(matches!(
            decode_state(b"VMST\x01\x00"),
            Err(ChainError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_and_faucet() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;
        assert_eq!(s.identity.address.len(), 40);
        assert!(s.identity.public_key.is_some());
        assert_eq!(bvm.get_balance(&s.identity.address).await.unwrap().confirmed, 10_000);

        let evm = chain(ChainKind::Evm);
        let s = session(&evm).await;
        assert!(s.identity.address.starts_with("0x"));
        assert!(s.identity.public_key.is_none());

        let err = evm.resolve_identity(&Credential::new("abc")).await.unwrap_err();
        assert!(matches!(err, ChainError::Credential(_)));
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_reports_already_known() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;
        let payload = SimPayload {
            from: s.identity.address.clone(),
            nonce: 0,
            inputs: Vec::new(),
            outputs: vec![TxOutput {
                value: 10,
                script: encode_state(&ContractState::Counter(0)),
            }],
            to: None,
            call: None,
        };

        let id = bvm.submit_transaction(&payload.to_hex()).await.unwrap();
        match bvm.submit_transaction(&payload.to_hex()).await {
            Err(ChainError::Rejected {
                message,
                transaction_id,
            }) => {
                assert!(message.contains("txn-already-known"));
                assert_eq!(transaction_id, Some(id));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_utxo_rejections() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;

        let empty = SimPayload {
            from: s.identity.address.clone(),
            nonce: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            to: None,
            call: None,
        };
        let err = bvm.submit_transaction(&empty.to_hex()).await.unwrap_err();
        assert!(err.raw_message().contains("bad-txns-vout-empty"));

        let expensive = SimPayload {
            outputs: vec![TxOutput {
                value: 1_000_000,
                script: Vec::new(),
            }],
            ..empty
        };
        let err = bvm.submit_transaction(&expensive.to_hex()).await.unwrap_err();
        assert!(err.raw_message().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_utxo_value_overflow_is_rejected() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;
        let output = |value| TxOutput {
            value,
            script: Vec::new(),
        };
        let payload = |outputs| SimPayload {
            from: s.identity.address.clone(),
            nonce: 0,
            inputs: Vec::new(),
            outputs,
            to: None,
            call: None,
        };

        let huge = payload(vec![output(u128::MAX), output(2)]);
        let err = bvm.submit_transaction(&huge.to_hex()).await.unwrap_err();
        assert!(err.raw_message().contains("bad-txns-vout-toolarge"));

        let total = payload(vec![output(MAX_MONEY), output(MAX_MONEY)]);
        let err = bvm.submit_transaction(&total.to_hex()).await.unwrap_err();
        assert!(err.raw_message().contains("bad-txns-txouttotal-toolarge"));

        let balance = bvm.get_balance(&s.identity.address).await.unwrap();
        assert_eq!(balance.confirmed, 10_000);
        assert_eq!(bvm.next_nonce(&s.identity.address).await, 0);
    }

    #[tokio::test]
    async fn test_nonce_at_max_value_is_rejected() {
        for kind in [ChainKind::Bvm, ChainKind::Evm] {
            let chain = chain(kind);
            let s = session(&chain).await;
            let payload = SimPayload {
                from: s.identity.address.clone(),
                nonce: u64::MAX,
                inputs: Vec::new(),
                outputs: vec![TxOutput {
                    value: 1,
                    script: Vec::new(),
                }],
                to: None,
                call: None,
            };
            let err = chain.submit_transaction(&payload.to_hex()).await.unwrap_err();
            assert!(err.raw_message().contains("nonce has max value"));
        }
    }

    #[tokio::test]
    async fn test_evm_deploy_rejects_negative_counter() {
        let evm = chain(ChainKind::Evm);
        let s = session(&evm).await;
        let client = SimulatedContractClient::new(evm.clone(), ContractKind::Counter);

        let err = client
            .deploy(&s, &ContractState::Counter(-3), 0)
            .await
            .unwrap_err();
        assert!(err.raw_message().contains("counter underflow"));
    }

    #[tokio::test]
    async fn test_bvm_counter_spends_previous_state() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;
        let client = SimulatedContractClient::new(bvm.clone(), ContractKind::Counter);

        let deployment = client
            .deploy(&s, &ContractState::Counter(0), 100)
            .await
            .unwrap();
        assert!(deployment.address.is_none());

        let handle = ContractHandle {
            transaction_id: deployment.transaction_id.clone(),
            address: None,
        };
        let next = client
            .invoke(&s, &handle, &MethodCall::Increment)
            .await
            .unwrap();
        let record = bvm.fetch_transaction(&next).await.unwrap();
        assert_eq!(record.outputs[0].value, 100);
        assert_eq!(
            client.decode_state_from_transaction(&record, 0).await.unwrap(),
            ContractState::Counter(1)
        );

        // The deploy output is spent now
        let err = client
            .invoke(&s, &handle, &MethodCall::Increment)
            .await
            .unwrap_err();
        assert!(err.raw_message().contains("bad-txns-inputs-missingorspent"));
    }

    #[tokio::test]
    async fn test_evm_reads_storage_at_transaction_height() {
        let evm = chain(ChainKind::Evm);
        let s = session(&evm).await;
        let client = SimulatedContractClient::new(evm.clone(), ContractKind::MessageStorage);

        let deployment = client
            .deploy(&s, &ContractState::message("first"), 0)
            .await
            .unwrap();
        let address = deployment.address.clone().unwrap();
        let handle = ContractHandle {
            transaction_id: deployment.transaction_id.clone(),
            address: Some(address),
        };
        let update = client
            .invoke(&s, &handle, &MethodCall::SetMessage(b"second".to_vec()))
            .await
            .unwrap();

        let deploy_record = evm.fetch_transaction(&deployment.transaction_id).await.unwrap();
        let update_record = evm.fetch_transaction(&update).await.unwrap();
        assert_eq!(
            client.decode_state_from_transaction(&deploy_record, 0).await.unwrap(),
            ContractState::message("first")
        );
        assert_eq!(
            client.decode_state_from_transaction(&update_record, 0).await.unwrap(),
            ContractState::message("second")
        );

        let counter_client = SimulatedContractClient::new(evm.clone(), ContractKind::Counter);
        let err = counter_client
            .decode_state_from_transaction(&update_record, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[tokio::test]
    async fn test_evm_counter_cannot_go_negative() {
        let evm = chain(ChainKind::Evm);
        let s = session(&evm).await;
        let client = SimulatedContractClient::new(evm.clone(), ContractKind::Counter);

        let deployment = client
            .deploy(&s, &ContractState::Counter(0), 0)
            .await
            .unwrap();
        let handle = ContractHandle {
            transaction_id: deployment.transaction_id,
            address: None,
        };
        let err = client
            .invoke(&s, &handle, &MethodCall::Decrement)
            .await
            .unwrap_err();
        assert!(err.raw_message().contains("execution reverted"));
    }

    #[tokio::test]
    async fn test_injected_fault_applies_once() {
        let bvm = chain(ChainKind::Bvm);
        let s = session(&bvm).await;
        let client = SimulatedContractClient::new(bvm.clone(), ContractKind::Counter);

        bvm.inject_fault(ChainError::Network("Request has been terminated".into()))
            .await;
        assert!(client.deploy(&s, &ContractState::Counter(0), 10).await.is_err());
        assert!(client.deploy(&s, &ContractState::Counter(0), 10).await.is_ok());
    }
}
