use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::Router;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use devcollab_settings::Settings;
use devcollab_store::habits::HabitRepo;
use devcollab_store::users::UserRepo;
use devcollab_store::Database;

use crate::routes;
use crate::token::TokenService;

#[derive(Clone, Debug)]
pub struct HabitusConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Base64-encoded signing key.
    pub jwt_secret: Option<SecretString>,
    pub token_ttl: chrono::Duration,
}

impl Default for HabitusConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            cors_origins: vec!["http://localhost:3000".into()],
            jwt_secret: None,
            token_ttl: chrono::Duration::minutes(72),
        }
    }
}

impl HabitusConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let ttl = i64::try_from(settings.habitus.token_ttl_minutes).unwrap_or(i64::MAX / 60_000);
        Self {
            host: settings.server.host.clone(),
            port: settings.habitus.port,
            cors_origins: settings.server.cors_origins.clone(),
            jwt_secret: settings
                .habitus
                .configured_jwt_secret()
                .map(|s| SecretString::from(s.to_string())),
            token_ttl: chrono::Duration::minutes(ttl),
        }
    }
}

#[derive(Clone)]
pub struct HabitusState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
}

impl HabitusState {
    pub fn users(&self) -> UserRepo {
        UserRepo::new(self.db.clone())
    }

    pub fn habits(&self) -> HabitRepo {
        HabitRepo::new(self.db.clone())
    }
}

pub fn build_router(state: HabitusState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .merge(routes::users::router())
        .merge(routes::habits::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Handle returned by [`start`].
pub struct HabitusHandle {
    pub port: u16,
    pub handle: tokio::task::JoinHandle<()>,
}

/// Bind and serve until `shutdown` fires.
pub async fn start(
    config: HabitusConfig,
    db: Database,
    shutdown: CancellationToken,
) -> Result<HabitusHandle, std::io::Error> {
    let tokens = TokenService::new(config.jwt_secret.as_ref(), config.token_ttl)
        .map_err(std::io::Error::other)?;
    let state = HabitusState {
        db,
        tokens: Arc::new(tokens),
    };

    let router = build_router(state, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "Habitus server started");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "habitus server error");
        }
    });

    Ok(HabitusHandle {
        port: local_addr.port(),
        handle,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let mut settings = Settings::default();
        settings.habitus.port = 9100;
        settings.habitus.token_ttl_minutes = 10;
        settings.habitus.jwt_secret = Some("c2VjcmV0".into());
        let config = HabitusConfig::from_settings(&settings);
        assert_eq!(config.port, 9100);
        assert_eq!(config.token_ttl, chrono::Duration::minutes(10));
        assert!(config.jwt_secret.is_some());

        settings.habitus.jwt_secret = Some(String::new());
        assert!(HabitusConfig::from_settings(&settings).jwt_secret.is_none());
    }
}
