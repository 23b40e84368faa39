use tokio::sync::broadcast;
use tracing::trace;

use crate::traits::Notifier;
use crate::types::WatcherEvent;

/// Fans events out to every subscribed listener (websocket connections).
/// Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<WatcherEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: WatcherEvent) {
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(delivered, "watcher event published");
    }
}

/// Drops every event. For headless runs.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn publish(&self, _event: WatcherEvent) {}
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let id = Uuid::new_v4();

        notifier.publish(WatcherEvent::update(id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.watcher_id(), id);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new(8);
        notifier.publish(WatcherEvent::update(Uuid::new_v4()));
    }
}
