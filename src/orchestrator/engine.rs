//! Orchestrator engine: the timed action bracket and the concrete actions

use super::guard::ActionGuard;
use super::validate;
use super::ActionKind;
use crate::chain::{
    classify, rejection::into_operation_error, Balance, ChainHandles, ChainKind, ContractHandle,
    ContractKind, ContractState, Deployment, Disposition, Identity, MethodCall, TransactionId,
    WalletSession,
};
use crate::config::AppConfig;
use crate::error::{ErrorKind, OperationError, OperationResult};
use crate::events::{Level, Notification, Notifier};
use crate::metrics;
use crate::state::{
    ActionRecord, BalanceView, ConnectionStatus, History, LatencyStats, OperationSnapshot,
    OperationState,
};
use crate::timer::{format_time, Timer, TimerCallback};

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Live view of the most recently started timing bracket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub action_id: Option<Uuid>,
    pub chain: Option<ChainKind>,
    pub action: Option<ActionKind>,
    pub elapsed_ms: u64,
    pub display: String,
    pub running: bool,
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self {
            action_id: None,
            chain: None,
            action: None,
            elapsed_ms: 0,
            display: format_time(0),
            running: false,
        }
    }
}

/// User-facing summary of a successful action
pub trait ActionSummary {
    fn summary(&self, chain: ChainKind) -> String;

    fn transaction_id(&self) -> Option<&TransactionId> {
        None
    }

    /// Broadcast was rejected as already known and reclassified
    fn already_known(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connected {
    pub identity: Identity,
    pub balance: BalanceView,
}

impl ActionSummary for Connected {
    fn summary(&self, chain: ChainKind) -> String {
        format!(
            "{} wallet connected: {} (balance {})",
            chain, self.identity.address, self.balance.display
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deployed {
    pub contract: ContractKind,
    pub transaction_id: TransactionId,
    pub address: Option<String>,
    pub state: ContractState,
    /// Broadcast was reported as already known
    pub already_known: bool,
}

impl ActionSummary for Deployed {
    fn summary(&self, chain: ChainKind) -> String {
        match &self.address {
            Some(address) => format!(
                "{} {} contract deployed at {} (tx {})",
                chain, self.contract, address, self.transaction_id
            ),
            None => format!(
                "{} {} contract deployed (tx {})",
                chain, self.contract, self.transaction_id
            ),
        }
    }

    fn transaction_id(&self) -> Option<&TransactionId> {
        Some(&self.transaction_id)
    }

    fn already_known(&self) -> bool {
        self.already_known
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutated {
    pub contract: ContractKind,
    pub method: &'static str,
    pub transaction_id: TransactionId,
    /// Read back from the new transaction; `None` if that failed
    pub state: Option<ContractState>,
    pub already_known: bool,
}

impl ActionSummary for Mutated {
    fn summary(&self, chain: ChainKind) -> String {
        match &self.state {
            Some(state) => format!(
                "{} {} confirmed (tx {}), {} is now {}",
                chain, self.method, self.transaction_id, self.contract, state
            ),
            None => format!(
                "{} {} confirmed (tx {}), state could not be read back",
                chain, self.method, self.transaction_id
            ),
        }
    }

    fn transaction_id(&self) -> Option<&TransactionId> {
        Some(&self.transaction_id)
    }

    fn already_known(&self) -> bool {
        self.already_known
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadState {
    pub contract: ContractKind,
    pub transaction_id: TransactionId,
    pub state: ContractState,
    /// False when the read targeted a transaction behind the contract's tip
    pub at_tip: bool,
}

impl ActionSummary for ReadState {
    fn summary(&self, chain: ChainKind) -> String {
        if self.at_tip {
            format!("{} {} state: {}", chain, self.contract, self.state)
        } else {
            format!(
                "{} {} state at {}: {}",
                chain, self.contract, self.transaction_id, self.state
            )
        }
    }

    fn transaction_id(&self) -> Option<&TransactionId> {
        Some(&self.transaction_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submitted {
    pub transaction_id: TransactionId,
    pub already_known: bool,
}

impl ActionSummary for Submitted {
    fn summary(&self, chain: ChainKind) -> String {
        if self.already_known {
            format!(
                "{} transaction already known to the network (tx {})",
                chain, self.transaction_id
            )
        } else {
            format!("{} transaction broadcast (tx {})", chain, self.transaction_id)
        }
    }

    fn transaction_id(&self) -> Option<&TransactionId> {
        Some(&self.transaction_id)
    }

    fn already_known(&self) -> bool {
        self.already_known
    }
}

/// Result of one timed action
#[derive(Debug, Clone)]
pub struct ActionOutcome<T> {
    pub id: Uuid,
    pub chain: ChainKind,
    pub action: ActionKind,
    pub elapsed_ms: u64,
    /// Final timer reading as `HH:MM:SS.mmm`
    pub duration: String,
    pub result: OperationResult<T>,
}

impl<T: ActionSummary> ActionOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(OperationError::kind)
    }

    /// Error kind, or `AlreadyKnown` for a reclassified success
    pub fn outcome_kind(&self) -> Option<ErrorKind> {
        match &self.result {
            Ok(value) if value.already_known() => Some(ErrorKind::AlreadyKnown),
            Ok(_) => None,
            Err(e) => Some(e.kind()),
        }
    }

    /// User-facing message
    pub fn message(&self) -> String {
        match &self.result {
            Ok(value) => value.summary(self.chain),
            Err(e) => format!("{} {} failed: {}", self.chain, self.action, e),
        }
    }
}

struct ChainContext {
    handles: ChainHandles,
    state: RwLock<OperationState>,
}

/// Coordinates timed actions for both chains
pub struct Orchestrator {
    bvm: ChainContext,
    evm: ChainContext,
    guard: ActionGuard,
    history: RwLock<History>,
    notifier: Notifier,
    timer_display: Arc<watch::Sender<TimerSnapshot>>,
    sampling_interval: Duration,
}

impl Orchestrator {
    pub fn new(bvm: ChainHandles, evm: ChainHandles, config: &AppConfig) -> Self {
        let (timer_display, _) = watch::channel(TimerSnapshot::default());

        Self {
            bvm: ChainContext {
                handles: bvm,
                state: RwLock::new(OperationState::default()),
            },
            evm: ChainContext {
                handles: evm,
                state: RwLock::new(OperationState::default()),
            },
            guard: ActionGuard::new(),
            history: RwLock::new(History::new(config.history_limit)),
            notifier: Notifier::new(config.notification_buffer),
            timer_display: Arc::new(timer_display),
            sampling_interval: Duration::from_millis(config.sampling_interval_ms),
        }
    }

    fn context(&self, chain: ChainKind) -> &ChainContext {
        match chain {
            ChainKind::Bvm => &self.bvm,
            ChainKind::Evm => &self.evm,
        }
    }

    // Read-only views

    pub async fn snapshot(&self, chain: ChainKind) -> OperationSnapshot {
        let ctx = self.context(chain);
        ctx.state
            .read()
            .await
            .snapshot(chain, &ctx.handles.explorer_url)
    }

    pub fn timer_snapshot(&self) -> TimerSnapshot {
        self.timer_display.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub async fn history(&self) -> Vec<ActionRecord> {
        self.history.read().await.records()
    }

    pub async fn latency_stats(&self) -> Vec<LatencyStats> {
        self.history.read().await.latency_stats()
    }

    // Timing bracket

    fn timer_for(&self, id: Uuid, chain: ChainKind) -> Timer {
        let display = self.timer_display.clone();
        let on_update: TimerCallback = Arc::new(move |ms: u64, formatted: &str| {
            display.send_if_modified(|snap| {
                if snap.action_id != Some(id) || !snap.running {
                    return false;
                }
                snap.elapsed_ms = ms;
                snap.display = formatted.to_string();
                true
            });
        });

        let display = self.timer_display.clone();
        let on_complete: TimerCallback = Arc::new(move |ms: u64, formatted: &str| {
            metrics::record_timer_stopped(chain);
            display.send_if_modified(|snap| {
                if snap.action_id != Some(id) {
                    return false;
                }
                snap.elapsed_ms = ms;
                snap.display = formatted.to_string();
                snap.running = false;
                true
            });
        });

        Timer::new()
            .with_sampling_interval(self.sampling_interval)
            .on_update(on_update)
            .on_complete(on_complete)
    }

    /// Run `body` inside a timing bracket for (chain, action).
    ///
    /// The timer is stopped on every exit path; if this future is dropped
    /// mid-flight the timer's own drop stops it.
    async fn run_action<T, F, Fut>(
        &self,
        chain: ChainKind,
        action: ActionKind,
        body: F,
    ) -> ActionOutcome<T>
    where
        T: ActionSummary,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OperationResult<T>>,
    {
        let id = Uuid::new_v4();
        let mut timer = self.timer_for(id, chain);

        self.timer_display.send_replace(TimerSnapshot {
            action_id: Some(id),
            chain: Some(chain),
            action: Some(action),
            elapsed_ms: 0,
            display: format_time(0),
            running: true,
        });
        timer.reset();
        metrics::record_timer_started(chain);
        timer.start();
        debug!("{} {} started ({})", chain, action, id);

        let result = match self.guard.try_acquire(chain, action) {
            Some(_permit) => body().await,
            None => Err(OperationError::ConcurrentOperation { chain, action }),
        };

        timer.stop();
        let elapsed_ms = timer.get_time();

        let outcome = ActionOutcome {
            id,
            chain,
            action,
            elapsed_ms,
            duration: format_time(elapsed_ms),
            result,
        };
        self.record(&outcome).await;
        outcome
    }

    /// Publish a finished action: displayed duration, history, metrics, notification, log
    async fn record<T: ActionSummary>(&self, outcome: &ActionOutcome<T>) {
        let message = outcome.message();
        let error_kind = outcome.error_kind();
        let transaction_id = outcome
            .result
            .as_ref()
            .ok()
            .and_then(|v| v.transaction_id().cloned());

        self.context(outcome.chain)
            .state
            .write()
            .await
            .displayed_duration = outcome.duration.clone();

        self.history.write().await.push(ActionRecord {
            id: outcome.id,
            chain: outcome.chain,
            action: outcome.action,
            ok: outcome.is_ok(),
            error_kind,
            elapsed_ms: outcome.elapsed_ms,
            duration: outcome.duration.clone(),
            transaction_id: transaction_id.clone(),
            finished_at: Utc::now(),
        });

        metrics::record_action(
            outcome.chain,
            outcome.action,
            outcome.elapsed_ms,
            outcome.outcome_kind(),
        );

        match error_kind {
            None => info!("{} in {}", message, outcome.duration),
            Some(kind) => warn!("{} [{}] after {}", message, kind.as_str(), outcome.duration),
        }

        self.notifier.publish(Notification {
            id: outcome.id,
            chain: outcome.chain,
            action: outcome.action,
            level: if outcome.is_ok() {
                Level::Success
            } else {
                Level::Error
            },
            message,
            kind: outcome.outcome_kind(),
            duration: outcome.duration.clone(),
            transaction_id,
            at: Utc::now(),
        });
    }

    /// Latest balance, or `None` with a warning if the query fails
    async fn refresh_balance(&self, chain: ChainKind, address: &str) -> Option<Balance> {
        match self.context(chain).handles.provider.get_balance(address).await {
            Ok(balance) => {
                metrics::record_wallet_balance(chain, balance.confirmed);
                Some(balance)
            }
            Err(e) => {
                warn!("Balance refresh failed on {}: {}", chain, e);
                None
            }
        }
    }

    async fn require_session(&self, chain: ChainKind) -> OperationResult<WalletSession> {
        self.context(chain)
            .state
            .read()
            .await
            .session()
            .ok_or_else(|| {
                OperationError::Precondition(format!("connect a {} wallet first", chain))
            })
    }

    // Actions

    /// Connect a wallet from a hex private key
    pub async fn connect(&self, chain: ChainKind, private_key: &str) -> ActionOutcome<Connected> {
        self.run_action(chain, ActionKind::Connect, || async move {
            let credential = validate::credential(private_key)?;
            let provider = &self.context(chain).handles.provider;

            let identity = provider
                .resolve_identity(&credential)
                .await
                .map_err(into_operation_error)?;
            let balance = provider
                .get_balance(&identity.address)
                .await
                .map_err(into_operation_error)?;

            if chain == ChainKind::Evm && balance.confirmed == 0 {
                return Err(OperationError::Precondition(format!(
                    "wallet {} has no balance; fund it before connecting",
                    identity.address
                )));
            }
            metrics::record_wallet_balance(chain, balance.confirmed);

            let mut state = self.context(chain).state.write().await;
            state.connection = ConnectionStatus::Connected;
            state.credential = Some(credential);
            state.identity = Some(identity.clone());
            state.balance = Some(balance);

            Ok(Connected {
                identity,
                balance: BalanceView {
                    confirmed: balance.confirmed.to_string(),
                    unconfirmed: balance.unconfirmed.to_string(),
                    display: chain.format_amount(balance.confirmed),
                },
            })
        })
        .await
    }

    /// Deploy a contract with its initial state
    pub async fn deploy(
        &self,
        chain: ChainKind,
        contract: ContractKind,
        initial: ContractState,
    ) -> ActionOutcome<Deployed> {
        self.run_action(chain, ActionKind::Deploy(contract), || async move {
            let session = self.require_session(chain).await?;
            if initial.kind() != contract {
                return Err(OperationError::Validation(format!(
                    "initial state does not fit a {} contract",
                    contract
                )));
            }
            match &initial {
                ContractState::Message(bytes) => {
                    validate::message(&String::from_utf8_lossy(bytes))?;
                }
                ContractState::Counter(n) if chain == ChainKind::Evm && *n < 0 => {
                    return Err(OperationError::Validation(format!(
                        "counter cannot start below zero on {}",
                        chain
                    )));
                }
                ContractState::Counter(_) => {}
            }

            let handles = &self.context(chain).handles;
            let funding = handles.deploy_funding;

            if chain == ChainKind::Bvm {
                let balance = self
                    .context(chain)
                    .state
                    .read()
                    .await
                    .balance
                    .unwrap_or_default();
                if balance.confirmed < u128::from(funding) {
                    return Err(OperationError::Precondition(format!(
                        "insufficient balance: deploying locks {}, wallet holds {}",
                        chain.format_amount(u128::from(funding)),
                        chain.format_amount(balance.confirmed)
                    )));
                }
            }

            let (mut deployment, already_known) =
                match handles.client(contract).deploy(&session, &initial, funding).await {
                    Ok(deployment) => (deployment, false),
                    Err(e) => match classify(e) {
                        Disposition::Accepted(transaction_id) => (
                            Deployment {
                                transaction_id,
                                address: None,
                            },
                            true,
                        ),
                        Disposition::Failed(e) => return Err(e),
                    },
                };

            // The chain's view of the new contract wins over the requested initial state
            let client = handles.client(contract);
            let fetched = handles
                .provider
                .fetch_transaction(&deployment.transaction_id)
                .await;
            let read_back = match fetched {
                Ok(record) => {
                    if deployment.address.is_none() {
                        deployment.address = record.contract_address.clone();
                    }
                    client.decode_state_from_transaction(&record, 0).await
                }
                Err(e) => Err(e),
            };
            let confirmed = match read_back {
                Ok(state) if state.kind() == contract => {
                    if state != initial {
                        warn!(
                            "{} {} deployed with {} instead of the requested {}",
                            chain, contract, state, initial
                        );
                    }
                    Some(state)
                }
                Ok(state) => {
                    warn!(
                        "Read-back of {} decoded a {} contract",
                        deployment.transaction_id,
                        state.kind()
                    );
                    None
                }
                Err(e) => {
                    warn!("Read-back of {} failed: {}", deployment.transaction_id, e);
                    None
                }
            };
            let fresh = confirmed.is_some();
            let deployed_state = confirmed.unwrap_or(initial);

            let balance = self.refresh_balance(chain, &session.identity.address).await;

            let mut state = self.context(chain).state.write().await;
            let slot = state.slot_mut(contract);
            slot.handle = Some(ContractHandle {
                transaction_id: deployment.transaction_id.clone(),
                address: deployment.address.clone(),
            });
            slot.state = Some(deployed_state.clone());
            slot.fresh = fresh;
            state.last_transaction_id = Some(deployment.transaction_id.clone());
            if balance.is_some() {
                state.balance = balance;
            }

            Ok(Deployed {
                contract,
                transaction_id: deployment.transaction_id,
                address: deployment.address,
                state: deployed_state,
                already_known,
            })
        })
        .await
    }

    /// Invoke a state-changing contract method, then read the new state back
    pub async fn mutate(
        &self,
        chain: ChainKind,
        contract: ContractKind,
        call: MethodCall,
    ) -> ActionOutcome<Mutated> {
        self.run_action(chain, ActionKind::Mutate(contract), || async move {
            let session = self.require_session(chain).await?;
            let method = call.method_name(chain);
            if call.contract_kind() != contract {
                return Err(OperationError::Validation(format!(
                    "{} is not a {} method",
                    method, contract
                )));
            }
            if let MethodCall::SetMessage(bytes) = &call {
                validate::message(&String::from_utf8_lossy(bytes))?;
            }

            let (handle, trusted) = {
                let state = self.context(chain).state.read().await;
                let slot = state.slot(contract);
                (slot.handle.clone(), slot.trusted_state().cloned())
            };
            let handle = handle.ok_or_else(|| {
                OperationError::Precondition(format!(
                    "deploy the {} contract on {} first",
                    contract, chain
                ))
            })?;

            if chain == ChainKind::Evm && call == MethodCall::Decrement {
                if let Some(ContractState::Counter(n)) = trusted {
                    if n <= 0 {
                        return Err(OperationError::Precondition(
                            "counter is already zero and cannot be decremented".to_string(),
                        ));
                    }
                }
            }

            let handles = &self.context(chain).handles;
            let client = handles.client(contract);

            let (transaction_id, already_known) =
                match client.invoke(&session, &handle, &call).await {
                    Ok(id) => (id, false),
                    Err(e) => match classify(e) {
                        Disposition::Accepted(id) => (id, true),
                        Disposition::Failed(e) => return Err(e),
                    },
                };

            let read_back = match handles.provider.fetch_transaction(&transaction_id).await {
                Ok(record) => client.decode_state_from_transaction(&record, 0).await,
                Err(e) => Err(e),
            };
            let new_state = match read_back {
                Ok(state) if state.kind() == contract => Some(state),
                Ok(state) => {
                    warn!("Read-back of {} decoded a {} contract", transaction_id, state.kind());
                    None
                }
                Err(e) => {
                    warn!("Read-back of {} failed: {}", transaction_id, e);
                    None
                }
            };

            let balance = self.refresh_balance(chain, &session.identity.address).await;

            let mut state = self.context(chain).state.write().await;
            let slot = state.slot_mut(contract);
            slot.handle = Some(ContractHandle {
                transaction_id: transaction_id.clone(),
                address: handle.address,
            });
            match &new_state {
                Some(decoded) => {
                    slot.state = Some(decoded.clone());
                    slot.fresh = true;
                }
                None => slot.fresh = false,
            }
            state.last_transaction_id = Some(transaction_id.clone());
            if balance.is_some() {
                state.balance = balance;
            }

            Ok(Mutated {
                contract,
                method,
                transaction_id,
                state: new_state,
                already_known,
            })
        })
        .await
    }

    /// Repeat a mutation sequentially, each step its own timed action.
    /// Stops after the first failure.
    pub async fn mutate_repeated(
        &self,
        chain: ChainKind,
        contract: ContractKind,
        call: MethodCall,
        times: u32,
    ) -> Vec<ActionOutcome<Mutated>> {
        let times = match validate::repeat_count(times) {
            Ok(times) => times,
            Err(e) => {
                let outcome = self
                    .run_action(chain, ActionKind::Mutate(contract), || async move { Err(e) })
                    .await;
                return vec![outcome];
            }
        };

        let mut outcomes = Vec::with_capacity(times as usize);
        for step in 1..=times {
            let outcome = self.mutate(chain, contract, call.clone()).await;
            let failed = !outcome.is_ok();
            outcomes.push(outcome);
            if failed {
                info!("{} burst stopped at step {} of {}", chain, step, times);
                break;
            }
        }
        outcomes
    }

    /// Fetch a transaction and decode contract state from it.
    ///
    /// Never trusts the cached state; `reference` defaults to the contract's
    /// latest transaction.
    pub async fn read(
        &self,
        chain: ChainKind,
        contract: ContractKind,
        reference: Option<TransactionId>,
    ) -> ActionOutcome<ReadState> {
        self.run_action(chain, ActionKind::Read(contract), || async move {
            let (connected, latest) = {
                let state = self.context(chain).state.read().await;
                (
                    state.is_connected(),
                    state.slot(contract).handle.clone(),
                )
            };
            if !connected {
                return Err(OperationError::Precondition(format!(
                    "connect a {} wallet first",
                    chain
                )));
            }

            let reference = reference
                .or_else(|| latest.as_ref().map(|h| h.transaction_id.clone()))
                .ok_or_else(|| {
                    OperationError::Precondition(format!(
                        "no {} transaction to read on {}; deploy first or pass a transaction id",
                        contract, chain
                    ))
                })?;

            let handles = &self.context(chain).handles;
            let record = handles
                .provider
                .fetch_transaction(&reference)
                .await
                .map_err(into_operation_error)?;
            let decoded = handles
                .client(contract)
                .decode_state_from_transaction(&record, 0)
                .await
                .map_err(into_operation_error)?;
            if decoded.kind() != contract {
                return Err(OperationError::Decode(format!(
                    "transaction {} carries a {} contract, not {}",
                    reference,
                    decoded.kind(),
                    contract
                )));
            }

            let address = record
                .contract_address
                .clone()
                .or_else(|| record.to.clone())
                .or_else(|| latest.and_then(|h| h.address));

            let mut state = self.context(chain).state.write().await;
            let slot = state.slot_mut(contract);
            let at_tip = slot
                .handle
                .as_ref()
                .map_or(true, |h| h.transaction_id == reference);
            if at_tip {
                slot.handle = Some(ContractHandle {
                    transaction_id: reference.clone(),
                    address,
                });
            } else {
                debug!(
                    "{} {} read at {} is behind the tip, keeping the current handle",
                    chain, contract, reference
                );
            }
            // A historical state must not steer the next mutation
            slot.state = Some(decoded.clone());
            slot.fresh = at_tip;

            Ok(ReadState {
                contract,
                transaction_id: reference,
                state: decoded,
                at_tip,
            })
        })
        .await
    }

    /// Broadcast a pre-signed raw transaction
    pub async fn submit(&self, chain: ChainKind, raw_hex: &str) -> ActionOutcome<Submitted> {
        self.run_action(chain, ActionKind::Submit, || async move {
            let session = self.require_session(chain).await?;
            let payload = validate::raw_payload(raw_hex)?;

            let (transaction_id, already_known) = match self
                .context(chain)
                .handles
                .provider
                .submit_transaction(&payload)
                .await
            {
                Ok(id) => (id, false),
                Err(e) => match classify(e) {
                    Disposition::Accepted(id) => (id, true),
                    Disposition::Failed(e) => return Err(e),
                },
            };

            let balance = self.refresh_balance(chain, &session.identity.address).await;

            let mut state = self.context(chain).state.write().await;
            state.last_transaction_id = Some(transaction_id.clone());
            if balance.is_some() {
                state.balance = balance;
            }

            Ok(Submitted {
                transaction_id,
                already_known,
            })
        })
        .await
    }
}
