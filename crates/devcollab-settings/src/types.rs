use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Shortest accepted HS256 signing key, in decoded bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub board: BoardSettings,
    pub habitus: HabitusSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.board.port != 0 && self.board.port == self.habitus.port {
            return Err(SettingsError::InvalidValue(format!(
                "board and habitus services share port {}",
                self.board.port
            )));
        }
        if self.board.session_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue("board.sessionTtlSecs must be positive".into()));
        }
        if self.habitus.token_ttl_minutes == 0 {
            return Err(SettingsError::InvalidValue(
                "habitus.tokenTtlMinutes must be positive".into(),
            ));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue("server.maxSendQueue must be positive".into()));
        }
        if let Some(secret) = self.habitus.configured_jwt_secret() {
            let key = STANDARD
                .decode(secret)
                .map_err(|e| SettingsError::WeakJwtSecret(format!("is not base64: {e}")))?;
            if key.len() < MIN_JWT_SECRET_BYTES {
                return Err(SettingsError::WeakJwtSecret(format!(
                    "decodes to {} bytes, need at least {MIN_JWT_SECRET_BYTES}",
                    key.len()
                )));
            }
        }
        Ok(())
    }
}

/// Network settings shared by both services.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Origins allowed to make credentialed cross-origin requests.
    pub cors_origins: Vec<String>,
    /// Per-client outbound WebSocket queue length.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardSettings {
    pub port: u16,
    /// Database file, relative to `~/.devcollab` unless absolute.
    pub database_path: String,
    /// Create the demo account and its first board at start-up.
    pub seed_demo_data: bool,
    /// Idle lifetime of a browser session.
    pub session_ttl_secs: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: "database/board.db".to_string(),
            seed_demo_data: true,
            session_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HabitusSettings {
    pub port: u16,
    pub database_path: String,
    /// Base64-encoded HMAC key for access tokens. A random key is generated
    /// per process when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub token_ttl_minutes: u64,
}

impl HabitusSettings {
    /// The configured secret, with a blank value counting as unset.
    pub fn configured_jwt_secret(&self) -> Option<&str> {
        self.jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Default for HabitusSettings {
    fn default() -> Self {
        Self {
            port: 8081,
            database_path: "database/habitus.db".to_string(),
            jwt_secret: None,
            token_ttl_minutes: 72,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Per-module overrides, e.g. `"devcollab_store": "debug"`.
    pub module_levels: BTreeMap<String, String>,
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: BTreeMap::new(),
            log_to_sqlite: true,
            log_db_path: "database/logs.db".to_string(),
        }
    }
}
