//! Outbound events for the UI collaborator.

use crate::history::CodeEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Event emitted by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    /// History changed; carries the full list, newest first.
    CodesUpdated {
        /// Current history.
        codes: Vec<CodeEntry>,
    },

    /// An authorization attempt completed and polling has started.
    AuthComplete,

    /// An authorization attempt was cancelled before completing.
    AuthCancelled,

    /// An authorization attempt failed or timed out.
    AuthError {
        /// Human-readable reason.
        message: String,
    },

    /// A user-facing notification (new code, polling failure).
    Notification {
        /// Short title.
        title: String,
        /// Body text. Never contains the code itself.
        body: String,
    },
}

/// Receiving half handed to the UI.
pub type EventReceiver = mpsc::UnboundedReceiver<WatchEvent>;

/// Cloneable sending half shared by the watcher's components.
///
/// Sending never fails: events emitted after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl EventSender {
    /// Creates a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits `event`.
    pub fn emit(&self, event: WatchEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            trace!(?event, "Event receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(WatchEvent::AuthError {
            message: "denied".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "auth_error");
        assert_eq!(json["message"], "denied");

        let json = serde_json::to_value(WatchEvent::CodesUpdated { codes: vec![] }).unwrap();
        assert_eq!(json["type"], "codes_updated");
        assert!(json["codes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (tx, rx) = EventSender::channel();
        drop(rx);
        tx.emit(WatchEvent::AuthComplete);
    }

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let (tx, mut rx) = EventSender::channel();
        tx.emit(WatchEvent::AuthComplete);
        tx.emit(WatchEvent::AuthCancelled);
        assert_eq!(rx.recv().await, Some(WatchEvent::AuthComplete));
        assert_eq!(rx.recv().await, Some(WatchEvent::AuthCancelled));
    }
}
