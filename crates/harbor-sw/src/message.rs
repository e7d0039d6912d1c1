//! Page → background messages.
//!
//! Messages travel as JSON values with a `type` discriminator. Each sender
//! delivers in order; nothing orders messages across senders.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::clients::ClientId;
use crate::ServiceWorkerError;

/// A message the page can post to the background process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate the waiting worker now.
    AdoptWaiting,

    /// Render a notification on the page's behalf.
    ShowNotification {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Map<String, Value>>,
    },
}

impl ClientMessage {
    /// Decode a posted value. Unknown or malformed messages yield `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        match Self::deserialize(value) {
            Ok(message) => Some(message),
            Err(e) => {
                let kind = value.get("type").and_then(Value::as_str).unwrap_or("<none>");
                debug!(kind, error = %e, "Ignoring message");
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A posted message with its origin window, if any.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: Option<ClientId>,
    pub payload: Value,
}

/// Posting half, held by pages.
#[derive(Debug, Clone)]
pub struct MessageSender {
    source: Option<ClientId>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MessageSender {
    /// A sender that stamps messages with `source`.
    pub fn with_source(&self, source: ClientId) -> Self {
        Self {
            source: Some(source),
            tx: self.tx.clone(),
        }
    }

    pub fn post(&self, message: &ClientMessage) -> Result<(), ServiceWorkerError> {
        self.post_raw(message.to_value())
    }

    /// Post an arbitrary JSON value; the receiver decides whether it is a message.
    pub fn post_raw(&self, payload: Value) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(Envelope {
                source: self.source,
                payload,
            })
            .map_err(|_| ServiceWorkerError::Message("background process is gone".to_string()))
    }
}

/// Receiving half, drained by the background process.
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl MessageReceiver {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

pub fn channel() -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MessageSender { source: None, tx }, MessageReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            ClientMessage::AdoptWaiting.to_value(),
            json!({ "type": "ADOPT_WAITING" })
        );

        let parsed = ClientMessage::parse(&json!({
            "type": "SHOW_NOTIFICATION",
            "title": "Hi",
            "options": { "body": "there" }
        }))
        .unwrap();
        match parsed {
            ClientMessage::ShowNotification { title, options } => {
                assert_eq!(title, "Hi");
                assert_eq!(options.unwrap()["body"], "there");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        assert!(ClientMessage::parse(&json!({ "type": "CLEAR_CACHE" })).is_none());
        assert!(ClientMessage::parse(&json!({ "type": "SHOW_NOTIFICATION" })).is_none());
        assert!(ClientMessage::parse(&json!("ADOPT_WAITING")).is_none());
    }

    #[tokio::test]
    async fn test_per_sender_order() {
        let (tx, mut rx) = channel();
        tx.post(&ClientMessage::AdoptWaiting).unwrap();
        tx.post_raw(json!({ "type": "NOOP" })).unwrap();

        assert_eq!(rx.recv().await.unwrap().payload["type"], "ADOPT_WAITING");
        assert_eq!(rx.recv().await.unwrap().payload["type"], "NOOP");
    }

    #[tokio::test]
    async fn test_post_after_receiver_dropped() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.post(&ClientMessage::AdoptWaiting).is_err());
    }
}
