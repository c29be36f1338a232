//! Messages WebSocket clients send to the server.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use devcollab_core::events::{
    ChatMessage, CursorMove, PomodoroRelay, RelayPhase, SyncEvent, UserPresence,
};

use crate::client::{ClientId, ClientRegistry};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Chat { payload: ChatMessage },
    Cursor { payload: CursorMove },
    Presence { payload: UserPresence },
    PomodoroStart { payload: Map<String, Value> },
    PomodoroComplete { payload: Map<String, Value> },
}

/// Events a client message fans out to. Chat adds one notification per
/// distinct mention.
pub fn events_for(message: ClientMessage) -> Vec<SyncEvent> {
    let now = Utc::now();
    match message {
        ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => Vec::new(),
        ClientMessage::Chat { payload } => {
            let chat = payload.stamped(now);
            let mut events: Vec<SyncEvent> = chat
                .mention_notifications(now)
                .into_iter()
                .map(SyncEvent::Notification)
                .collect();
            events.insert(0, SyncEvent::Chat(chat));
            events
        }
        ClientMessage::Cursor { payload } => vec![SyncEvent::Cursor(payload)],
        ClientMessage::Presence { payload } => vec![SyncEvent::Presence(payload)],
        ClientMessage::PomodoroStart { payload } => {
            vec![SyncEvent::PomodoroRelay(PomodoroRelay::new(RelayPhase::Start, payload, now))]
        }
        ClientMessage::PomodoroComplete { payload } => {
            vec![SyncEvent::PomodoroRelay(PomodoroRelay::new(RelayPhase::Complete, payload, now))]
        }
    }
}

/// Handle one raw client frame.
pub fn handle_client_message(
    registry: &ClientRegistry,
    events: &broadcast::Sender<SyncEvent>,
    client_id: &ClientId,
    raw: &str,
) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "unparseable client message");
            let reply = json!({ "type": "error", "message": format!("invalid message: {e}") });
            registry.send_to(client_id, reply.to_string());
            return;
        }
    };

    match &message {
        ClientMessage::Subscribe { topic } => {
            registry.subscribe(client_id, topic);
            let reply = json!({ "type": "subscribed", "topic": topic });
            registry.send_to(client_id, reply.to_string());
        }
        ClientMessage::Unsubscribe { topic } => {
            registry.unsubscribe(client_id, topic);
            let reply = json!({ "type": "unsubscribed", "topic": topic });
            registry.send_to(client_id, reply.to_string());
        }
        _ => {}
    }

    for event in events_for(message) {
        // No receivers only means nobody is listening yet.
        let _ = events.send(event);
    }
}

/// Process incoming messages from WebSocket clients until the channel
/// closes or `shutdown` fires.
pub async fn process_client_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    registry: Arc<ClientRegistry>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            next = rx.recv() => next,
            _ = shutdown.cancelled() => break,
        };
        let Some((client_id, raw)) = next else { break };
        handle_client_message(&registry, &events, &client_id, &raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ClientMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn chat_fans_out_mentions() {
        let events = events_for(parse(
            r#"{"type":"chat","payload":{"message":"hi @bo and @cy, @bo","userName":"ana"}}"#,
        ));
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].topic(), "chat");
        assert_eq!(events[1].topic(), "notifications");
        assert_eq!(events[2].topic(), "notifications");
        let SyncEvent::Chat(chat) = &events[0] else {
            panic!("expected chat first");
        };
        assert!(chat.timestamp.is_some());
    }

    #[test]
    fn relays_are_timestamped() {
        let events = events_for(parse(r#"{"type":"pomodoro_complete","payload":{"subtaskId":"sub_1"}}"#));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "pomodoro_complete");
        assert!(events[0].payload().unwrap()["timestamp"].is_string());
    }

    #[test]
    fn subscriptions_publish_nothing() {
        assert!(events_for(parse(r#"{"type":"subscribe","topic":"chat"}"#)).is_empty());
    }

    #[test]
    fn subscribe_is_acknowledged() {
        let registry = ClientRegistry::new(8);
        let (events, _keep) = broadcast::channel(8);
        let (id, mut rx) = registry.register();

        handle_client_message(&registry, &events, &id, r#"{"type":"subscribe","topic":"cursors"}"#);
        let ack: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(registry.subscribers("cursors"), vec![id]);
    }

    #[test]
    fn garbage_gets_error_reply() {
        let registry = ClientRegistry::new(8);
        let (events, mut events_rx) = broadcast::channel(8);
        let (id, mut rx) = registry.register();

        handle_client_message(&registry, &events, &id, "not json");
        let reply: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn presence_is_broadcast() {
        let registry = ClientRegistry::new(8);
        let (events, mut events_rx) = broadcast::channel(8);
        let (id, _rx) = registry.register();

        handle_client_message(
            &registry,
            &events,
            &id,
            r#"{"type":"presence","payload":{"userName":"bo","connected":true}}"#,
        );
        assert_eq!(events_rx.try_recv().unwrap().topic(), "presence");
    }

    #[tokio::test]
    async fn message_loop_stops_on_shutdown() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (events, _keep) = broadcast::channel(8);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let (id, _client_rx) = registry.register();

        let task = tokio::spawn(process_client_messages(rx, registry, events, shutdown.clone()));
        tx.send((id, r#"{"type":"subscribe","topic":"chat"}"#.into()))
            .await
            .unwrap();
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("loop exits while the sender is still open")
            .unwrap();
        drop(tx);
    }
}
