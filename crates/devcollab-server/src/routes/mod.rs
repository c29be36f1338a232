pub mod accounts;
pub mod boards;
pub mod logs;
pub mod pomodoro;
pub mod projects;
pub mod subtasks;
pub mod tasks;
pub mod time_entries;
pub mod workspace;

use axum::http::HeaderMap;

use devcollab_core::events::{ProjectUpdate, SyncEvent, UpdateAction};
use devcollab_core::ids::ProjectId;
use devcollab_core::status::WorkStatus;
use devcollab_store::projects::ProjectRow;
use devcollab_store::StoreError;

use crate::error::ApiError;
use crate::session::Session;

pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_COLOR_HEADER: &str = "x-user-color";

/// Who is shown as the author of a live update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub color: String,
}

impl Actor {
    pub fn resolve(session: &Session, headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            name: session.display_name(header(USER_NAME_HEADER)),
            color: session.color(header(USER_COLOR_HEADER)),
        }
    }

    pub fn update(
        &self,
        project_id: ProjectId,
        project_name: String,
        status: WorkStatus,
        pomodoro_start: Option<chrono::DateTime<chrono::Utc>>,
        action: UpdateAction,
    ) -> SyncEvent {
        SyncEvent::ProjectUpdate(ProjectUpdate {
            project_id,
            project_name,
            status,
            pomodoro_start,
            action,
            user_name: self.name.clone(),
            user_color: self.color.clone(),
        })
    }

    pub fn project_update(&self, project: &ProjectRow, action: UpdateAction) -> SyncEvent {
        self.update(
            project.id.clone(),
            project.name.clone(),
            project.status,
            project.timer.pomodoro_start,
            action,
        )
    }
}

/// Treat a missing referenced row as a client error rather than a 404.
pub(crate) fn missing_as_bad_request(e: StoreError, message: &str) -> ApiError {
    match e {
        StoreError::NotFound(_) => ApiError::BadRequest(message.to_string()),
        other => other.into(),
    }
}

/// Look up an optional reference, dropping ids that resolve to nothing.
pub(crate) fn resolve_optional<T, R>(
    id: Option<T>,
    lookup: impl FnOnce(&T) -> Result<R, StoreError>,
) -> Result<Option<T>, ApiError> {
    let Some(id) = id else { return Ok(None) };
    match lookup(&id) {
        Ok(_) => Ok(Some(id)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    use devcollab_store::{schema, Database};
    use tokio_util::sync::CancellationToken;

    use crate::server::{self, ServerConfig, ServerHandle};

    pub struct TestServer {
        pub handle: ServerHandle,
        pub db: Database,
        pub client: reqwest::Client,
        pub shutdown: CancellationToken,
    }

    impl TestServer {
        pub async fn start() -> Self {
            Self::start_with(ServerConfig {
                port: 0,
                host: "127.0.0.1".into(),
                seed_demo_data: false,
                ..ServerConfig::default()
            })
            .await
        }

        pub async fn start_with(config: ServerConfig) -> Self {
            let db = Database::in_memory(schema::BOARD).unwrap();
            let shutdown = CancellationToken::new();
            let handle = server::start(config, db.clone(), None, shutdown.clone())
                .await
                .unwrap();
            let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
            Self {
                handle,
                db,
                client,
                shutdown,
            }
        }

        pub fn addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], self.handle.port))
        }

        pub fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.addr())
        }

        /// A client with its own cookie jar, i.e. a second browser.
        pub fn other_client(&self) -> reqwest::Client {
            reqwest::Client::builder().cookie_store(true).build().unwrap()
        }

        pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
            self.client.post(self.url(path)).json(&body).send().await.unwrap()
        }

        pub async fn patch_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
            self.client.patch(self.url(path)).json(&body).send().await.unwrap()
        }

        pub async fn get(&self, path: &str) -> reqwest::Response {
            self.client.get(self.url(path)).send().await.unwrap()
        }

        pub async fn post(&self, path: &str) -> reqwest::Response {
            self.client.post(self.url(path)).send().await.unwrap()
        }

        pub async fn delete(&self, path: &str) -> reqwest::Response {
            self.client.delete(self.url(path)).send().await.unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }
}
