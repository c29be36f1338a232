use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique client identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket client and the topics it follows.
///
/// Every field is safe to touch from several tasks at once, so publishing
/// never has to skip a client that another task is updating.
pub struct Client {
    pub id: ClientId,
    topics: RwLock<HashSet<String>>,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            topics: RwLock::new(HashSet::new()),
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn follows(&self, topic: &str) -> bool {
        self.topics.read().contains(topic)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Queue a message without waiting. Full queues drop it.
    fn offer(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %self.id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self::with_timeout(max_send_queue, CLIENT_TIMEOUT)
    }

    pub fn with_timeout(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new client and return its ID + receiver.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    fn client(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Remove a client by ID.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.disconnect();
        }
    }

    pub fn subscribe(&self, client_id: &ClientId, topic: &str) -> bool {
        self.client(client_id)
            .is_some_and(|c| c.topics.write().insert(topic.to_string()))
    }

    pub fn unsubscribe(&self, client_id: &ClientId, topic: &str) -> bool {
        self.client(client_id)
            .is_some_and(|c| c.topics.write().remove(topic))
    }

    /// Send a message to a specific client. Drops the message if its queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        self.client(client_id).is_some_and(|c| c.offer(message))
    }

    /// Deliver a message to every client subscribed to `topic`.
    /// Returns how many clients accepted it.
    pub fn publish(&self, topic: &str, message: &str) -> usize {
        let targets: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|e| e.is_connected() && e.follows(topic))
            .map(|e| Arc::clone(e.value()))
            .collect();
        targets
            .iter()
            .filter(|c| c.offer(message.to_string()))
            .count()
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Get all client IDs following a topic.
    pub fn subscribers(&self, topic: &str) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|e| e.follows(topic))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|e| !e.is_alive(self.client_timeout))
            .map(|e| e.id.clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "Cleaned up dead client");
        }
        dead.len()
    }

    fn record_pong(&self, client_id: &ClientId) {
        if let Some(client) = self.client(client_id) {
            client.record_pong();
        }
    }

    fn mark_disconnected(&self, client_id: &ClientId) {
        if let Some(client) = self.client(client_id) {
            client.disconnect();
        }
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle
/// with heartbeat. On `shutdown` the client gets a close frame.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
    heartbeat: Duration,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
                _ = shutdown.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        writer_registry.mark_disconnected(&writer_cid);
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_cid),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {},
        _ = &mut reader => {},
    }
    writer.abort();
    reader.abort();

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "Dead client cleanup");
            }
        }
    })
}
