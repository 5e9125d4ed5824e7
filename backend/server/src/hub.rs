use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast::{Receiver, Sender, channel};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::UserId;

const GROUP_CAPACITY: usize = 64;

pub fn chat_group(chat: Uuid) -> String {
    format!("chat_{chat}")
}

pub fn notification_group(user: UserId) -> String {
    format!("notifications_{user}")
}

/// Named broadcast groups that WebSocket connections subscribe to.
#[derive(Default)]
pub struct Hub {
    groups: DashMap<String, Sender<String>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, group: &str) -> Receiver<String> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| channel(GROUP_CAPACITY).0)
            .subscribe()
    }

    /// Sends to everyone currently in `group`. Nobody listening is not an error.
    pub fn publish<T: Serialize>(&self, group: &str, event: &T) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(group, "Failed to encode event: {e}");
                return;
            }
        };

        let Some(sender) = self.groups.get(group).map(|s| s.clone()) else {
            return;
        };

        if sender.send(payload).is_err() {
            debug!(group, "No subscribers left, dropping group");
            self.release(group);
        }
    }

    /// Drops `group` once nobody is subscribed. Call after dropping a receiver.
    pub fn release(&self, group: &str) {
        self.groups.remove_if(group, |_, s| s.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = Hub::new();
        let group = chat_group(Uuid::nil());
        let mut first = hub.subscribe(&group);
        let mut second = hub.subscribe(&group);

        hub.publish(&group, &json!({"type": "message.new"}));

        assert_eq!(first.recv().await.unwrap(), r#"{"type":"message.new"}"#);
        assert_eq!(second.recv().await.unwrap(), r#"{"type":"message.new"}"#);
    }

    #[test]
    fn publishing_to_an_empty_group_is_fine() {
        let hub = Hub::new();
        hub.publish("nobody", &json!({"type": "noop"}));

        let receiver = hub.subscribe("gone");
        drop(receiver);
        hub.publish("gone", &json!({"type": "noop"}));
        assert!(hub.groups.get("gone").is_none());
    }

    #[test]
    fn released_group_goes_once_the_last_receiver_leaves() {
        let hub = Hub::new();
        let first = hub.subscribe("quiet");
        let second = hub.subscribe("quiet");

        drop(first);
        hub.release("quiet");
        assert!(hub.groups.get("quiet").is_some());

        drop(second);
        hub.release("quiet");
        assert!(hub.groups.get("quiet").is_none());
    }
}
