//! In-memory operation state
//!
//! Handles:
//! - Per-chain operation state (connection, wallet, balance, contracts)
//! - Read-only snapshots for the API layer
//! - Latency history and per-action comparison statistics

mod history;
mod operation;

pub use history::{ActionRecord, History, LatencyStats};
pub use operation::{BalanceView, ConnectionStatus, OperationSnapshot, OperationState};
