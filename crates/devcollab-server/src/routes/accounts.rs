use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use devcollab_core::password;
use devcollab_store::users::UserRow;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session::{Session, SessionUser};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    #[serde(default)]
    name: String,
    password: SecretString,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: SecretString,
}

/// Register once per email; a repeat registration changes nothing.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    let email = req.email.trim();
    if email.is_empty() || req.password.expose_secret().is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }
    let users = state.users();
    if users.exists_by_email(email)? {
        return Ok(Json(json!({ "status": "exists" })));
    }
    let name = if req.name.trim().is_empty() { email } else { req.name.trim() };
    let user = users.create(email, name, &password::hash_password(&req.password)?)?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok(Json(json!({ "status": "registered", "user": user })))
}

async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<UserRow>> {
    let user = state
        .users()
        .find_by_email(req.email.trim())?
        .filter(|u| password::verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".into()))?;
    session.login(SessionUser {
        id: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
    });
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(user))
}

async fn logout(Extension(session): Extension<Session>) -> ApiResult<()> {
    if let Some(user) = session.user() {
        tracing::info!(user_id = %user.id, "user logged out");
    }
    session.logout();
    Ok(())
}

async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<UserRow>> {
    let user = session
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Login required".into()))?;
    Ok(Json(state.users().get(&user.id)?))
}
