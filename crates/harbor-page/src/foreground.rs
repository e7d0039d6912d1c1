//! Push messages that arrive while a page is focused are handed to the
//! background process so both paths render the same way.

use harbor_sw::config::NotificationDefaults;
use harbor_sw::notification::content_from_push;
use harbor_sw::{ClientMessage, MessageSender, ServiceWorkerError};
use serde_json::Value;
use tracing::debug;

pub struct ForegroundMessages {
    sender: MessageSender,
    defaults: NotificationDefaults,
}

impl ForegroundMessages {
    pub fn new(sender: MessageSender, defaults: NotificationDefaults) -> Self {
        Self { sender, defaults }
    }

    /// Forward a foreground push payload as `SHOW_NOTIFICATION`.
    pub fn on_message(&self, payload: &[u8]) -> Result<(), ServiceWorkerError> {
        let (title, options) = content_from_push(Some(payload), &self.defaults);
        let options = match serde_json::to_value(&options) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        debug!(%title, "Forwarding foreground message");
        self.sender
            .post(&ClientMessage::ShowNotification { title, options })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_sw::channel;

    #[tokio::test]
    async fn test_forwards_as_show_notification() {
        let (tx, mut rx) = channel();
        let foreground = ForegroundMessages::new(tx, NotificationDefaults::default());

        foreground
            .on_message(br#"{"notification":{"title":"Hi"},"data":{"tag":"t1","url":"/x"}}"#)
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        match ClientMessage::parse(&envelope.payload).unwrap() {
            ClientMessage::ShowNotification { title, options } => {
                let options = options.unwrap();
                assert_eq!(title, "Hi");
                assert_eq!(options["tag"], "t1");
                assert_eq!(options["data"]["url"], "/x");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
