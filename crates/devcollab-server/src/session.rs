//! Cookie-backed browser sessions held in memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use devcollab_core::ids::UserId;
use devcollab_core::palette;

use crate::workspace::WorkspaceProject;

pub const SESSION_COOKIE: &str = "devcollab_session";
const SESSION_ID_LEN: usize = 32;

/// The account bound to a session by a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct SessionData {
    pub user: Option<SessionUser>,
    pub user_name: Option<String>,
    pub user_color: Option<String>,
    pub guest_projects: Vec<WorkspaceProject>,
}

struct SessionEntry {
    data: Mutex<SessionData>,
    last_seen: Mutex<Instant>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            data: Mutex::new(SessionData::default()),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// What the response must do with the session cookie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CookieAction {
    Keep,
    Set,
    Clear,
}

struct Binding {
    /// `None` until the session is first written to.
    id: Option<String>,
    entry: Arc<SessionEntry>,
    cookie: CookieAction,
}

/// Handle to one session, placed in request extensions by [`session_layer`].
///
/// A request without a known cookie gets a detached session: reads see empty
/// data and nothing is stored until a handler writes to it.
#[derive(Clone)]
pub struct Session {
    store: Arc<SessionStore>,
    binding: Arc<Mutex<Binding>>,
}

impl Session {
    fn new(store: Arc<SessionStore>, id: Option<String>, entry: Arc<SessionEntry>) -> Self {
        Self {
            store,
            binding: Arc::new(Mutex::new(Binding {
                id,
                entry,
                cookie: CookieAction::Keep,
            })),
        }
    }

    /// The stored id, if this session has been persisted.
    pub fn id(&self) -> Option<String> {
        self.binding.lock().id.clone()
    }

    fn entry(&self) -> Arc<SessionEntry> {
        Arc::clone(&self.binding.lock().entry)
    }

    /// Store a detached session under a fresh id.
    fn persist(&self) -> Arc<SessionEntry> {
        let mut binding = self.binding.lock();
        if binding.id.is_none() {
            let id = self.store.insert(Arc::clone(&binding.entry));
            binding.id = Some(id);
            binding.cookie = CookieAction::Set;
        }
        Arc::clone(&binding.entry)
    }

    /// Move the session's data to a fresh id, retiring the old one.
    fn rekey(&self) {
        let mut binding = self.binding.lock();
        if let Some(old) = binding.id.take() {
            self.store.remove(&old);
        }
        let id = self.store.insert(Arc::clone(&binding.entry));
        binding.id = Some(id);
        binding.cookie = CookieAction::Set;
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.entry().data.lock().user.clone()
    }

    /// Bind the account and issue a new session id, so an id known before
    /// login never carries the account.
    pub fn login(&self, user: SessionUser) {
        self.entry().data.lock().user = Some(user);
        self.rekey();
    }

    /// Forget the session entirely, guest state included.
    pub fn logout(&self) {
        let mut binding = self.binding.lock();
        *binding.entry.data.lock() = SessionData::default();
        if let Some(id) = binding.id.take() {
            self.store.remove(&id);
            binding.cookie = CookieAction::Clear;
        }
    }

    /// Display name for live updates: the header value, else the name
    /// remembered by the session, else the member's name, else a generated
    /// `Guest<millis>` that sticks to the session.
    pub fn display_name(&self, header: Option<&str>) -> String {
        if let Some(name) = header.filter(|h| !h.is_empty()) {
            return name.to_string();
        }
        if let Some(name) = self
            .entry()
            .data
            .lock()
            .user_name
            .clone()
            .filter(|n| !n.is_empty())
        {
            return name;
        }
        let entry = self.persist();
        let mut data = entry.data.lock();
        let name = match &data.user {
            Some(user) => user.name.clone(),
            None => format!("Guest{}", chrono::Utc::now().timestamp_millis()),
        };
        data.user_name = Some(name.clone());
        name
    }

    /// Display colour: the header value, else one picked once per session.
    pub fn color(&self, header: Option<&str>) -> String {
        if let Some(color) = header.filter(|h| !h.is_empty()) {
            return color.to_string();
        }
        if let Some(color) = self.entry().data.lock().user_color.clone() {
            return color;
        }
        let entry = self.persist();
        let mut data = entry.data.lock();
        data.user_color
            .get_or_insert_with(|| palette::random_user_color().to_string())
            .clone()
    }

    /// Read the session's data without storing a detached session.
    pub fn read_data<R>(&self, f: impl FnOnce(&SessionData) -> R) -> R {
        f(&self.entry().data.lock())
    }

    /// Run `f` with exclusive access to the session's data, storing the
    /// session first if it is detached.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let entry = self.persist();
        let mut data = entry.data.lock();
        f(&mut data)
    }

    fn cookie_header(&self) -> Option<String> {
        let binding = self.binding.lock();
        match (binding.cookie, &binding.id) {
            (CookieAction::Set, Some(id)) => Some(format!(
                "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"
            )),
            (CookieAction::Clear, _) => Some(format!(
                "{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
            )),
            _ => None,
        }
    }
}

/// All stored sessions, expired after an idle TTL.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Resolve the session named by a cookie. Unknown or expired ids get a
    /// detached session that is stored only once written to.
    pub fn resolve(self: &Arc<Self>, cookie: Option<&str>) -> Session {
        if let Some(id) = cookie {
            if let Some(entry) = self.sessions.get(id) {
                if entry.idle_for() < self.ttl {
                    entry.touch();
                    return Session::new(
                        Arc::clone(self),
                        Some(id.to_string()),
                        Arc::clone(entry.value()),
                    );
                }
            }
        }
        Session::new(Arc::clone(self), None, Arc::new(SessionEntry::new()))
    }

    fn insert(&self, entry: Arc<SessionEntry>) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        entry.touch();
        self.sessions.insert(id.clone(), entry);
        tracing::debug!(sessions = self.sessions.len(), "session stored");
        id
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drop sessions idle for at least the TTL.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.idle_for() < self.ttl);
        before.saturating_sub(self.sessions.len())
    }
}

/// Read the session id from the request's cookies.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Attach a [`Session`] to every request and send the cookie when the
/// handler stored, re-keyed or dropped the session.
pub async fn session_layer(
    State(store): State<Arc<SessionStore>>,
    mut req: Request,
    next: Next,
) -> Response {
    let cookie = session_cookie(req.headers());
    let session = store.resolve(cookie.as_deref());
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;
    if let Some(cookie) = session.cookie_header() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "invalid session cookie value"),
        }
    }
    response
}

/// Periodically expire idle sessions until shutdown.
pub fn start_cleanup_task(
    store: Arc<SessionStore>,
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
            let removed = store.cleanup_expired();
            if removed > 0 {
                tracing::info!(removed, "Expired idle sessions");
            }
        }
    })
}
