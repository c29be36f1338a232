use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use devcollab_core::events::SyncEvent;

use crate::client::ClientRegistry;

/// Wire frame sent to WebSocket clients.
#[derive(Debug, Serialize)]
pub struct Frame<'a> {
    pub topic: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub payload: Value,
}

/// Subscribes to the sync event broadcast and forwards events to the
/// clients following each event's topic.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Forward events until the channel closes or `shutdown` fires.
    pub fn start(
        &self,
        mut rx: broadcast::Receiver<SyncEvent>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    received = rx.recv() => received,
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Event bridge stopping");
                        break;
                    }
                };
                match received {
                    Ok(event) => {
                        let topic = event.topic();
                        if let Some(json) = serialize_event(&event) {
                            let delivered = registry.publish(&topic, &json);
                            tracing::trace!(topic = %topic, kind = event.kind(), delivered, "Event published");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<SyncEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx, shutdown)
}

/// Serialize an event into its wire frame.
pub fn serialize_event(event: &SyncEvent) -> Option<String> {
    let topic = event.topic();
    let payload = match event.payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(kind = event.kind(), error = %e, "Failed to serialize event payload");
            return None;
        }
    };
    serde_json::to_string(&Frame {
        topic: &topic,
        kind: event.kind(),
        payload,
    })
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcollab_core::events::{ChatMessage, CursorMove};

    fn chat(text: &str) -> SyncEvent {
        SyncEvent::Chat(ChatMessage {
            project_id: None,
            message: text.into(),
            user_name: "ana".into(),
            user_color: None,
            timestamp: None,
        })
    }

    #[test]
    fn frame_shape() {
        let json = serialize_event(&chat("hi")).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["topic"], "chat");
        assert_eq!(value["type"], "chat");
        assert_eq!(value["payload"]["message"], "hi");
        assert_eq!(value["payload"]["userName"], "ana");
    }

    #[tokio::test]
    async fn bridge_forwards_to_topic_subscribers() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        registry.subscribe(&client_id, "chat");

        let handle = create_bridge(Arc::clone(&registry), rx, CancellationToken::new());
        tx.send(chat("hello")).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg = client_rx.try_recv().unwrap();
        assert!(msg.contains("hello"));
        handle.abort();
    }

    #[tokio::test]
    async fn bridge_ignores_other_topics() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        registry.subscribe(&client_id, "chat");

        let _handle = create_bridge(Arc::clone(&registry), rx, CancellationToken::new());
        tx.send(SyncEvent::Cursor(CursorMove {
            user_id: None,
            user_name: "bo".into(),
            user_color: None,
            x: 1.0,
            y: 2.0,
            project_id: None,
        }))
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_stops_when_channel_closes() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel::<SyncEvent>(4);
        let handle = create_bridge(registry, rx, CancellationToken::new());
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bridge_stops_on_shutdown_while_senders_live() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (_tx, rx) = broadcast::channel::<SyncEvent>(8);
        let shutdown = CancellationToken::new();

        let handle = create_bridge(registry, rx, shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("bridge exits after cancel")
            .unwrap();
    }
}
