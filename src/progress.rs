//! Fire-and-forget progress notices for UI or scheduler consumers.

use tokio::sync::mpsc;

/// A human-readable progress notice. Observed by zero or more listeners;
/// never affects control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub message: String,
}

/// Sending half of the progress channel.
///
/// `send` never blocks and a dropped receiver is ignored, so slow or absent
/// listeners cannot stall the fetch.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// A channel pair; the receiver side is handed to the listener.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                message: message.into(),
            });
        }
    }
}
