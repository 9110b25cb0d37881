//! Error types for vm-compare

use crate::chain::{ChainKind, TransactionId};
use crate::orchestrator::ActionKind;

use serde::Serialize;
use thiserror::Error;

/// Failures reported by the chain collaborators (providers and contract clients)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Invalid credential: {0}")]
    Credential(String),

    /// Broadcast rejected by the network. The id is set when the payload's id is known.
    #[error("Transaction rejected: {message}")]
    Rejected {
        message: String,
        transaction_id: Option<TransactionId>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction {0} not found")]
    NotFound(TransactionId),

    #[error("Deploy failed: {0}")]
    Deploy(String),

    #[error("Contract call failed: {0}")]
    Invoke(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl ChainError {
    /// Raw text carried by the error, used by the rejection classifier
    pub fn raw_message(&self) -> String {
        match self {
            ChainError::Credential(m)
            | ChainError::Network(m)
            | ChainError::Deploy(m)
            | ChainError::Invoke(m)
            | ChainError::Decode(m)
            | ChainError::Provider(m) => m.clone(),
            ChainError::Rejected { message, .. } => message.clone(),
            ChainError::NotFound(id) => id.to_string(),
        }
    }
}

/// Result type for collaborator calls
pub type ChainResult<T> = Result<T, ChainError>;

/// Discriminant of an orchestrator failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    Validation,
    Network,
    RemoteRejection,
    Decode,
    AlreadyKnown,
    NotFound,
    ConcurrentOperation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::RemoteRejection => "remote_rejection",
            ErrorKind::Decode => "decode",
            ErrorKind::AlreadyKnown => "already_known",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConcurrentOperation => "concurrent_operation",
        }
    }
}

/// Classified failure of one orchestrator action, carrying the user-facing message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction rejected: {0}")]
    RemoteRejection(String),

    #[error("Could not decode contract state: {0}")]
    Decode(String),

    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("{action} is already in progress on {chain}")]
    ConcurrentOperation { chain: ChainKind, action: ActionKind },
}

impl OperationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperationError::Precondition(_) => ErrorKind::Precondition,
            OperationError::Validation(_) => ErrorKind::Validation,
            OperationError::Network(_) => ErrorKind::Network,
            OperationError::RemoteRejection(_) => ErrorKind::RemoteRejection,
            OperationError::Decode(_) => ErrorKind::Decode,
            OperationError::NotFound(_) => ErrorKind::NotFound,
            OperationError::ConcurrentOperation { .. } => ErrorKind::ConcurrentOperation,
        }
    }
}

/// Result type for orchestrator actions
pub type OperationResult<T> = Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_discriminant() {
        assert_eq!(
            OperationError::Precondition("x".into()).kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            OperationError::Decode("x".into()).kind().as_str(),
            "decode"
        );
        let concurrent = OperationError::ConcurrentOperation {
            chain: ChainKind::Bvm,
            action: ActionKind::Connect,
        };
        assert_eq!(concurrent.to_string(), "connect is already in progress on BVM");
    }

    #[test]
    fn test_raw_message() {
        let err = ChainError::Rejected {
            message: "257: txn-already-known".into(),
            transaction_id: None,
        };
        assert_eq!(err.raw_message(), "257: txn-already-known");
        assert_eq!(err.to_string(), "Transaction rejected: 257: txn-already-known");
    }
}
