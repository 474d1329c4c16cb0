use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one channel per actor (admin, buyer, or seller). The
/// external notification dispatcher subscribes here; the engine never
/// talks to users directly.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events addressed to an actor. Creates the channel if
    /// needed.
    pub fn subscribe(&self, actor_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(actor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, actor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&actor_id) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdminProfile, Event};

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let admin_id = Ulid::new();
        let mut rx = hub.subscribe(admin_id);

        let event = Event::AdminRegistered {
            admin: AdminProfile {
                id: admin_id,
                email: "desk@campus.edu".into(),
            },
        };
        hub.send(admin_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let actor = Ulid::new();
        // No subscriber — must not panic
        hub.send(
            actor,
            &Event::AdminRegistered {
                admin: AdminProfile {
                    id: actor,
                    email: "nobody@campus.edu".into(),
                },
            },
        );
    }
}
