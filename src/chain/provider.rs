//! EVM JSON-RPC adapter with multi-endpoint failover

use super::{
    Balance, ChainOperationProvider, ContractClient, ContractHandle, ContractKind, ContractState,
    Credential, Deployment, Identity, MethodCall, TransactionId, TransactionRecord, WalletSession,
};
use crate::config::RpcConfig;
use crate::error::{ChainError, ChainResult};

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::contract::{Contract, ContractFactory};
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Wallet for a hex private key
fn wallet_from(credential: &Credential, chain_id: u64) -> ChainResult<LocalWallet> {
    credential
        .expose()
        .parse::<LocalWallet>()
        .map(|w| w.with_chain_id(chain_id))
        .map_err(|e| ChainError::Credential(e.to_string()))
}

fn parse_address(address: &str) -> ChainResult<Address> {
    address
        .parse::<Address>()
        .map_err(|e| ChainError::Provider(format!("invalid address {}: {}", address, e)))
}

fn parse_hash(id: &TransactionId) -> ChainResult<H256> {
    id.as_str()
        .parse::<H256>()
        .map_err(|_| ChainError::NotFound(id.clone()))
}

fn hash_id(hash: H256) -> TransactionId {
    TransactionId::new(format!("{:?}", hash))
}

fn saturating_u128(value: U256) -> u128 {
    if value.bits() > 128 {
        u128::MAX
    } else {
        value.low_u128()
    }
}

/// Node error responses are rejections; anything else is transport
fn provider_error(err: ProviderError, tx: Option<&TransactionId>) -> ChainError {
    match RpcError::as_error_response(&err) {
        Some(response) => ChainError::Rejected {
            message: response.message.clone(),
            transaction_id: tx.cloned(),
        },
        None => ChainError::Network(err.to_string()),
    }
}

/// Chain Operation Provider over one or more JSON-RPC endpoints
pub struct EvmRpcProvider {
    providers: Vec<Provider<Http>>,
    current: AtomicUsize,
    chain_id: u64,
}

impl EvmRpcProvider {
    pub async fn new(config: &RpcConfig) -> anyhow::Result<Self> {
        let mut providers = Vec::new();
        for url in std::iter::once(&config.url).chain(config.fallback_urls.iter()) {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let poll = Duration::from_millis(config.poll_interval_ms);
                    providers.push(provider.interval(poll));
                    debug!("Added EVM RPC endpoint {}", url);
                }
                Err(e) => warn!("Skipping EVM RPC endpoint {}: {}", url, e),
            }
        }

        if providers.is_empty() {
            anyhow::bail!("No valid EVM RPC endpoints");
        }

        let reported = providers[0].get_chainid().await?.as_u64();
        if let Some(expected) = config.chain_id {
            if expected != reported {
                anyhow::bail!(
                    "EVM endpoint reports chain id {}, configured {}",
                    reported,
                    expected
                );
            }
        }
        info!("EVM RPC connected, chain id {}", reported);

        Ok(Self {
            providers,
            current: AtomicUsize::new(0),
            chain_id: reported,
        })
    }

    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    fn failover(&self) {
        let next = (self.current.load(Ordering::Relaxed) + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("EVM RPC failover to endpoint {}", next);
    }

    /// Signing middleware for a connected wallet
    fn signer(&self, session: &WalletSession) -> ChainResult<Arc<SignerClient>> {
        let wallet = wallet_from(&session.credential, self.chain_id)?;
        Ok(Arc::new(SignerMiddleware::new(self.http().clone(), wallet)))
    }
}

#[async_trait]
impl ChainOperationProvider for EvmRpcProvider {
    async fn resolve_identity(&self, credential: &Credential) -> ChainResult<Identity> {
        let wallet = wallet_from(credential, self.chain_id)?;
        Ok(Identity {
            address: format!("{:?}", wallet.address()),
            public_key: None,
        })
    }

    async fn submit_transaction(&self, raw_hex: &str) -> ChainResult<TransactionId> {
        let bytes: Bytes = raw_hex
            .parse()
            .map_err(|_| ChainError::Rejected {
                message: "TX decode failed".to_string(),
                transaction_id: None,
            })?;
        let id = hash_id(H256::from(ethers::utils::keccak256(&bytes)));

        let pending = self
            .http()
            .send_raw_transaction(bytes)
            .await
            .map_err(|e| provider_error(e, Some(&id)))?;
        Ok(hash_id(pending.tx_hash()))
    }

    async fn fetch_transaction(&self, id: &TransactionId) -> ChainResult<TransactionRecord> {
        let hash = parse_hash(id)?;

        let mut last_error = None;
        for _ in 0..self.providers.len() {
            match self.http().get_transaction(hash).await {
                Ok(Some(tx)) => {
                    let receipt = self
                        .http()
                        .get_transaction_receipt(hash)
                        .await
                        .map_err(|e| provider_error(e, None))?;
                    return Ok(TransactionRecord {
                        id: id.clone(),
                        block_height: tx.block_number.map(|b| b.as_u64()),
                        to: tx.to.map(|a| format!("{:?}", a)),
                        contract_address: receipt
                            .and_then(|r| r.contract_address)
                            .map(|a| format!("{:?}", a)),
                        outputs: Vec::new(),
                        input: tx.input.to_vec(),
                    });
                }
                Ok(None) => return Err(ChainError::NotFound(id.clone())),
                Err(e) => {
                    warn!("Failed to fetch {} from EVM RPC: {}", id, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error
            .map(|e| provider_error(e, None))
            .unwrap_or_else(|| ChainError::Network("all endpoints failed".to_string())))
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Balance> {
        let address = parse_address(address)?;
        let confirmed = self
            .http()
            .get_balance(address, None)
            .await
            .map_err(|e| provider_error(e, None))?;
        Ok(Balance {
            confirmed: saturating_u128(confirmed),
            unconfirmed: 0,
        })
    }
}

/// Compiled contract artifact: `{ "abi": [...], "bytecode": "0x..." }`
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl Artifact {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Contract Client deploying and calling a compiled contract through ethers
pub struct EvmContractClient {
    kind: ContractKind,
    provider: Arc<EvmRpcProvider>,
    artifact: Artifact,
}

impl EvmContractClient {
    pub fn from_artifact(
        kind: ContractKind,
        provider: Arc<EvmRpcProvider>,
        path: &Path,
    ) -> anyhow::Result<Self> {
        let artifact = Artifact::load(path)?;
        check_artifact(kind, &artifact)?;
        Ok(Self {
            kind,
            provider,
            artifact,
        })
    }

    fn getter(&self) -> &'static str {
        match self.kind {
            ContractKind::MessageStorage => "message",
            ContractKind::Counter => "getCounter",
        }
    }
}

/// Constructor tokens for the initial state. An artifact whose constructor
/// takes nothing can only start from the zero state.
fn constructor_args(abi: &Abi, initial: &ContractState) -> ChainResult<Vec<Token>> {
    let takes_args = abi
        .constructor()
        .map(|c| !c.inputs.is_empty())
        .unwrap_or(false);
    match (takes_args, initial) {
        (true, ContractState::Message(bytes)) => Ok(vec![Token::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )]),
        (true, ContractState::Counter(n)) => u64::try_from(*n)
            .map(|n| vec![Token::Uint(U256::from(n))])
            .map_err(|_| ChainError::Deploy(format!("counter cannot start at {}", n))),
        (false, ContractState::Counter(0)) => Ok(Vec::new()),
        (false, state) => Err(ChainError::Deploy(format!(
            "constructor takes no arguments, cannot start from {}",
            state
        ))),
    }
}

/// The artifact must expose the methods this kind is driven through
fn check_artifact(kind: ContractKind, artifact: &Artifact) -> anyhow::Result<()> {
    let required: &[&str] = match kind {
        ContractKind::MessageStorage => &["message", "updateMessage"],
        ContractKind::Counter => &["getCounter", "increment", "decrement"],
    };
    for name in required {
        if artifact.abi.function(name).is_err() {
            anyhow::bail!("{} artifact has no `{}` function", kind, name);
        }
    }
    Ok(())
}

#[async_trait]
impl ContractClient for EvmContractClient {
    async fn deploy(
        &self,
        session: &WalletSession,
        initial: &ContractState,
        _funding: u64,
    ) -> ChainResult<Deployment> {
        let signer = self.provider.signer(session)?;
        let factory = ContractFactory::new(
            self.artifact.abi.clone(),
            self.artifact.bytecode.clone(),
            signer,
        );

        let deployer = factory
            .deploy_tokens(constructor_args(&self.artifact.abi, initial)?)
            .map_err(|e| ChainError::Deploy(e.to_string()))?;
        let (contract, receipt) = deployer
            .send_with_receipt()
            .await
            .map_err(|e| ChainError::Deploy(e.to_string()))?;

        Ok(Deployment {
            transaction_id: hash_id(receipt.transaction_hash),
            address: Some(format!("{:?}", contract.address())),
        })
    }

    async fn invoke(
        &self,
        session: &WalletSession,
        contract: &ContractHandle,
        call: &MethodCall,
    ) -> ChainResult<TransactionId> {
        let address = contract
            .address
            .as_deref()
            .ok_or_else(|| ChainError::Invoke("contract address unknown".to_string()))?;
        let instance = Contract::new(
            parse_address(address)?,
            self.artifact.abi.clone(),
            self.provider.signer(session)?,
        );

        let name = call.method_name(super::ChainKind::Evm);
        let method = match call {
            MethodCall::SetMessage(bytes) => {
                instance.method::<_, ()>(name, String::from_utf8_lossy(bytes).into_owned())
            }
            MethodCall::Increment | MethodCall::Decrement => instance.method::<_, ()>(name, ()),
        }
        .map_err(|e| ChainError::Invoke(e.to_string()))?;

        let pending = method
            .send()
            .await
            .map_err(|e| ChainError::Invoke(e.to_string()))?;
        let id = hash_id(pending.tx_hash());

        // Wait for inclusion so the read-back sees the mined state
        pending
            .await
            .map_err(|e| provider_error(e, Some(&id)))?;
        Ok(id)
    }

    async fn decode_state_from_transaction(
        &self,
        record: &TransactionRecord,
        _output_index: usize,
    ) -> ChainResult<ContractState> {
        let address = record
            .contract_address
            .as_deref()
            .or(record.to.as_deref())
            .ok_or_else(|| {
                ChainError::Decode(format!("transaction {} touches no contract", record.id))
            })?;
        let height = record
            .block_height
            .ok_or_else(|| ChainError::Decode(format!("transaction {} is not mined", record.id)))?;

        let instance = Contract::new(
            parse_address(address)?,
            self.artifact.abi.clone(),
            Arc::new(self.provider.http().clone()),
        );

        match self.kind {
            ContractKind::MessageStorage => {
                let message: String = instance
                    .method::<_, String>(self.getter(), ())
                    .map_err(|e| ChainError::Decode(e.to_string()))?
                    .block(BlockId::Number(height.into()))
                    .call()
                    .await
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                Ok(ContractState::Message(message.into_bytes()))
            }
            ContractKind::Counter => {
                let value: U256 = instance
                    .method::<_, U256>(self.getter(), ())
                    .map_err(|e| ChainError::Decode(e.to_string()))?
                    .block(BlockId::Number(height.into()))
                    .call()
                    .await
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                let value = i64::try_from(saturating_u128(value))
                    .map_err(|_| ChainError::Decode("counter exceeds i64".to_string()))?;
                Ok(ContractState::Counter(value))
            }
        }
    }
}
