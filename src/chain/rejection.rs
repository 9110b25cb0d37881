//! Classification of collaborator failures into orchestrator errors
//!
//! Broadcast endpoints report most failures as free text. The phrase tables
//! below are the single place that text is matched; call sites only see the
//! resulting `Disposition`.

use super::TransactionId;
use crate::error::{ChainError, OperationError};

/// Rejections meaning the transaction is already broadcast and its id is usable
const ALREADY_KNOWN: &[&str] = &[
    "Transaction already in the mempool",
    "txn-already-known",
    "already known",
];

/// Transport-level interruptions
const INTERRUPTED: &[&str] = &[
    "Request has been terminated",
    "connection reset",
    "connection refused",
    "timed out",
];

/// BIP22 reject reasons and their short categories
const REJECT_CATEGORIES: &[(&str, &str)] = &[
    ("bad-txns-vin-empty", "Transaction is missing inputs."),
    ("bad-txns-vout-empty", "Transaction is missing outputs."),
    ("bad-txns-oversize", "Transaction is too large."),
    ("bad-txns-vout-negative", "Transaction output value is negative."),
    ("bad-txns-vout-toolarge", "Transaction output value is too large."),
    (
        "bad-txns-txouttotal-toolarge",
        "Transaction total output value is too large.",
    ),
    (
        "bad-txns-prevout-null",
        "Transaction inputs previous TX reference is null.",
    ),
    ("bad-txns-inputs-duplicate", "Transaction contains duplicate inputs."),
    ("bad-txns-inputs-too-large", "Transaction inputs too large."),
    ("bad-txns-fee-negative", "Transaction network fee is negative."),
    ("bad-txns-fee-outofrange", "Transaction network fee is out of range."),
    ("mandatory-script-verify-flag-failed", "Script evaluation failed."),
];

const INTERRUPTED_MESSAGE: &str =
    "the request was interrupted; check your network connection and try again";

/// Outcome of classifying a collaborator failure
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Reclassified as success; the transaction id is usable
    Accepted(TransactionId),
    Failed(OperationError),
}

pub fn is_already_known(message: &str) -> bool {
    ALREADY_KNOWN.iter().any(|p| message.contains(p))
}

pub fn is_interrupted(message: &str) -> bool {
    let lower = message.to_lowercase();
    INTERRUPTED
        .iter()
        .any(|p| lower.contains(&p.to_lowercase()))
}

/// Short human-readable category for a raw rejection, or the text unchanged
pub fn friendly_rejection(message: &str) -> String {
    REJECT_CATEGORIES
        .iter()
        .find(|(code, _)| message.contains(code))
        .map(|(_, category)| category.to_string())
        .unwrap_or_else(|| message.to_string())
}

/// Classify a collaborator failure
pub fn classify(err: ChainError) -> Disposition {
    let raw = err.raw_message();
    if is_interrupted(&raw) {
        return Disposition::Failed(OperationError::Network(INTERRUPTED_MESSAGE.to_string()));
    }

    let failed = match err {
        ChainError::Rejected {
            message,
            transaction_id,
        } => {
            if is_already_known(&message) {
                match transaction_id {
                    Some(id) => return Disposition::Accepted(id),
                    None => OperationError::RemoteRejection(format!(
                        "network reports the transaction as already known but returned no id ({})",
                        message
                    )),
                }
            } else {
                OperationError::RemoteRejection(friendly_rejection(&message))
            }
        }
        ChainError::Credential(message) => OperationError::Validation(message),
        ChainError::Network(message) | ChainError::Provider(message) => {
            OperationError::Network(message)
        }
        ChainError::NotFound(id) => OperationError::NotFound(id.to_string()),
        ChainError::Deploy(message) | ChainError::Invoke(message) => {
            OperationError::RemoteRejection(friendly_rejection(&message))
        }
        ChainError::Decode(message) => OperationError::Decode(message),
    };

    Disposition::Failed(failed)
}

/// Classify where only failure is meaningful (reads, balance queries)
pub fn into_operation_error(err: ChainError) -> OperationError {
    match classify(err) {
        Disposition::Failed(e) => e,
        Disposition::Accepted(id) => OperationError::RemoteRejection(format!(
            "unexpected already-known response for {}",
            id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rejected(message: &str, id: Option<&str>) -> ChainError {
        ChainError::Rejected {
            message: message.to_string(),
            transaction_id: id.map(TransactionId::new),
        }
    }

    #[test]
    fn test_already_known_is_success() {
        assert_eq!(
            classify(rejected("Transaction already in the mempool", Some("ab12"))),
            Disposition::Accepted(TransactionId::new("ab12"))
        );
        assert_eq!(
            classify(rejected("257: txn-already-known", Some("cd34"))),
            Disposition::Accepted(TransactionId::new("cd34"))
        );
    }

    #[test]
    fn test_already_known_without_id_fails() {
        match classify(rejected("txn-already-known", None)) {
            Disposition::Failed(e) => assert_eq!(e.kind(), ErrorKind::RemoteRejection),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bip22_categories() {
        for (code, category) in REJECT_CATEGORIES {
            let raw = format!("16: {}", code);
            assert_eq!(
                classify(rejected(&raw, Some("ff"))),
                Disposition::Failed(OperationError::RemoteRejection(category.to_string()))
            );
        }
        assert_eq!(friendly_rejection("something else"), "something else");
    }

    #[test]
    fn test_interrupted_is_network() {
        let disposition = classify(ChainError::Invoke("Request has been terminated".into()));
        match disposition {
            Disposition::Failed(e) => {
                assert_eq!(e.kind(), ErrorKind::Network);
                assert!(e.to_string().contains("interrupted"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(is_interrupted("operation Timed Out after 30s"));
    }

    #[test]
    fn test_other_kinds() {
        assert_eq!(
            into_operation_error(ChainError::Credential("bad key".into())).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            into_operation_error(ChainError::NotFound(TransactionId::new("00"))).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            into_operation_error(ChainError::Decode("no state".into())).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            into_operation_error(ChainError::Provider("503".into())).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            into_operation_error(ChainError::Deploy("bad-txns-oversize".into())),
            OperationError::RemoteRejection("Transaction is too large.".into())
        );
    }
}
