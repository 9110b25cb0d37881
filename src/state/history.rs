//! Bounded log of finished actions and latency comparison

use crate::chain::{ChainKind, TransactionId};
use crate::error::ErrorKind;
use crate::orchestrator::ActionKind;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// One finished, timed action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub chain: ChainKind,
    pub action: ActionKind,
    pub ok: bool,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
    pub duration: String,
    pub transaction_id: Option<TransactionId>,
    pub finished_at: DateTime<Utc>,
}

/// Latency summary for one (chain, action) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub chain: ChainKind,
    pub action: ActionKind,
    pub count: usize,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

pub struct History {
    limit: usize,
    records: VecDeque<ActionRecord>,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: VecDeque::new(),
        }
    }

    /// Append, evicting the oldest record when full
    pub fn push(&mut self, record: ActionRecord) {
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records oldest first
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.iter().cloned().collect()
    }

    /// Statistics over successful actions only
    pub fn latency_stats(&self) -> Vec<LatencyStats> {
        let mut groups: BTreeMap<(ChainKind, String), (ActionKind, Vec<u64>)> = BTreeMap::new();

        for record in self.records.iter().filter(|r| r.ok) {
            groups
                .entry((record.chain, record.action.to_string()))
                .or_insert_with(|| (record.action, Vec::new()))
                .1
                .push(record.elapsed_ms);
        }

        groups
            .into_iter()
            .filter_map(|((chain, _), (action, samples))| {
                let min_ms = *samples.iter().min()?;
                let max_ms = *samples.iter().max()?;
                let total: u64 = samples.iter().sum();
                Some(LatencyStats {
                    chain,
                    action,
                    count: samples.len(),
                    mean_ms: total as f64 / samples.len() as f64,
                    min_ms,
                    max_ms,
                })
            })
            .collect()
    }
}
