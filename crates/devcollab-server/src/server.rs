use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use devcollab_core::events::SyncEvent;
use devcollab_settings::Settings;
use devcollab_store::boards::BoardRepo;
use devcollab_store::pomodoro_logs::PomodoroLogRepo;
use devcollab_store::projects::ProjectRepo;
use devcollab_store::subtasks::SubtaskRepo;
use devcollab_store::tasks::TaskRepo;
use devcollab_store::time_entries::TimeEntryRepo;
use devcollab_store::users::UserRepo;
use devcollab_store::Database;
use devcollab_telemetry::SqliteLogSink;

use crate::client::{self, ClientId, ClientRegistry};
use crate::health::{self, HealthResponse};
use crate::session::{self, SessionStore};
use crate::shutdown::ServiceTask;
use crate::{event_bridge, protocol, routes, seed};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const CLIENT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Board service configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub session_ttl: Duration,
    pub seed_demo_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec!["http://localhost:3000".into()],
            max_send_queue: 256,
            heartbeat_interval: client::HEARTBEAT_INTERVAL,
            client_timeout: client::CLIENT_TIMEOUT,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            seed_demo_data: true,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.board.port,
            cors_origins: settings.server.cors_origins.clone(),
            max_send_queue: settings.server.max_send_queue,
            heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(settings.server.client_timeout_secs),
            session_ttl: Duration::from_secs(settings.board.session_ttl_secs),
            seed_demo_data: settings.board.seed_demo_data,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub client_registry: Arc<ClientRegistry>,
    pub sessions: Arc<SessionStore>,
    pub events: broadcast::Sender<SyncEvent>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
    pub log_sink: Option<Arc<SqliteLogSink>>,
    pub started_at: Instant,
    pub heartbeat: Duration,
    /// Open sockets close when this fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Hand an event to the bridge. Dropped silently when nobody listens.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn boards(&self) -> BoardRepo {
        BoardRepo::new(self.db.clone())
    }

    pub fn projects(&self) -> ProjectRepo {
        ProjectRepo::new(self.db.clone())
    }

    pub fn tasks(&self) -> TaskRepo {
        TaskRepo::new(self.db.clone())
    }

    pub fn subtasks(&self) -> SubtaskRepo {
        SubtaskRepo::new(self.db.clone())
    }

    pub fn pomodoro_logs(&self) -> PomodoroLogRepo {
        PomodoroLogRepo::new(self.db.clone())
    }

    pub fn time_entries(&self) -> TimeEntryRepo {
        TimeEntryRepo::new(self.db.clone())
    }

    pub fn users(&self) -> UserRepo {
        UserRepo::new(self.db.clone())
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .merge(routes::boards::router())
        .merge(routes::projects::router())
        .merge(routes::tasks::router())
        .merge(routes::subtasks::router())
        .merge(routes::time_entries::router())
        .merge(routes::logs::router());

    let session_layer =
        axum::middleware::from_fn_with_state(Arc::clone(&state.sessions), session::session_layer);

    Router::new()
        .nest("/api", api)
        .nest("/pomodoro", routes::pomodoro::router())
        .merge(routes::workspace::router())
        .merge(routes::accounts::router())
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Create and start the server. Background tasks stop when `shutdown` fires.
pub async fn start(
    config: ServerConfig,
    db: Database,
    log_sink: Option<Arc<SqliteLogSink>>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    if config.seed_demo_data {
        seed::seed_demo_data(&db).map_err(std::io::Error::other)?;
    }

    let client_registry = Arc::new(ClientRegistry::with_timeout(
        config.max_send_queue,
        config.client_timeout,
    ));
    let sessions = Arc::new(SessionStore::new(config.session_ttl));
    let (events, bridge_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let bridge = event_bridge::create_bridge(Arc::clone(&client_registry), bridge_rx, shutdown.clone());
    let client_cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        CLIENT_SWEEP_INTERVAL,
        shutdown.clone(),
    );
    let session_cleanup =
        session::start_cleanup_task(Arc::clone(&sessions), SESSION_SWEEP_INTERVAL, shutdown.clone());

    let (message_tx, message_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let processor = tokio::spawn(protocol::process_client_messages(
        message_rx,
        Arc::clone(&client_registry),
        events.clone(),
        shutdown.clone(),
    ));

    let state = AppState {
        db,
        client_registry,
        sessions,
        events,
        message_tx,
        log_sink,
        started_at: Instant::now(),
        heartbeat: config.heartbeat_interval,
        shutdown: shutdown.clone(),
    };

    let router = build_router(state, &config.cors_origins);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "DevCollab server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        tasks: vec![
            ServiceTask::new("http", server),
            ServiceTask::new("event-bridge", bridge),
            ServiceTask::new("client-messages", processor),
            ServiceTask::new("client-sweep", client_cleanup),
            ServiceTask::new("session-sweep", session_cleanup),
        ],
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    tasks: Vec<ServiceTask>,
}

impl ServerHandle {
    /// Give up the background tasks, for [`ShutdownCoordinator::drain`](crate::shutdown::ShutdownCoordinator::drain).
    pub fn into_tasks(self) -> Vec<ServiceTask> {
        self.tasks
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    /// Comma-separated topics to subscribe on connect.
    topics: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, params: WsParams) {
    let (client_id, rx) = state.client_registry.register();
    let topics = params.topics.unwrap_or_default();
    for topic in topics.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        state.client_registry.subscribe(&client_id, topic);
    }
    tracing::info!(client_id = %client_id, topics = %topics, "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.message_tx,
        state.heartbeat,
        state.shutdown,
    )
    .await;
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.started_at,
        state.client_registry.count(),
        state.sessions.count(),
    ))
}
