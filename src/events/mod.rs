//! User-facing notifications
//!
//! Every finished action produces exactly one `Notification`, broadcast to all
//! subscribers. Slow subscribers lag rather than block the orchestrator.

use crate::chain::{ChainKind, TransactionId};
use crate::error::ErrorKind;
use crate::orchestrator::ActionKind;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
}

/// Message surfaced to the user for one finished action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Id of the action that produced it
    pub id: Uuid,
    pub chain: ChainKind,
    pub action: ActionKind,
    pub level: Level,
    pub message: String,
    pub kind: Option<ErrorKind>,
    pub duration: String,
    pub transaction_id: Option<TransactionId>,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        // No subscribers is fine
        if self.tx.send(notification).is_err() {
            trace!("Notification dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(level: Level) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            chain: ChainKind::Bvm,
            action: ActionKind::Connect,
            level,
            message: "Wallet connected".to_string(),
            kind: None,
            duration: "00:00:00.120".to_string(),
            transaction_id: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();

        notifier.publish(notification(Level::Success));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.level, Level::Success);
        assert_eq!(received.message, "Wallet connected");
    }

    #[test]
    fn test_publish_without_subscribers() {
        Notifier::new(1).publish(notification(Level::Error));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(notification(Level::Error)).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["chain"], "bvm");
        assert_eq!(json["action"], "connect");
    }
}
