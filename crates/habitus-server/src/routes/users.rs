use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use devcollab_core::ids::UserId;
use devcollab_core::password;
use devcollab_store::users::UserRow;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::server::HabitusState;

pub fn router() -> Router<HabitusState> {
    Router::new()
        .route(
            "/user/",
            post(register).get(get_user).put(update_user).delete(delete_user),
        )
        .route("/user/login", get(login).post(login))
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    name: String,
    password: SecretString,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: SecretString,
}

#[derive(Deserialize)]
struct UserUpdate {
    id: UserId,
    name: Option<String>,
    email: Option<String>,
    password: Option<SecretString>,
}

#[derive(Deserialize)]
struct IdParams {
    id: UserId,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: UserRow,
}

async fn register(
    State(state): State<HabitusState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if req.email.trim().is_empty() || req.password.expose_secret().is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }
    let user = state
        .users()
        .create(&req.email, &req.name, &password::hash_password(&req.password)?)?;
    let token = state.tokens.issue(&user.email)?;
    tracing::info!(user_id = %user.id, "habitus user registered");
    Ok(Json(AuthResponse { token, user }))
}

/// 404 for an unknown email, 400 for a wrong password.
async fn login(
    State(state): State<HabitusState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state
        .users()
        .find_by_email(req.email.trim())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    if !password::verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::BadRequest("Invalid credentials".into()));
    }
    let token = state.tokens.issue(&user.email)?;
    Ok(Json(AuthResponse { token, user }))
}

async fn get_user(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Query(params): Query<IdParams>,
) -> ApiResult<Json<UserRow>> {
    let user = state.users().get(&params.id)?;
    auth.ensure_owner(&user.id)?;
    Ok(Json(user))
}

async fn update_user(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Json(req): Json<UserUpdate>,
) -> ApiResult<Json<UserRow>> {
    let users = state.users();
    let mut user = users.get(&req.id)?;
    auth.ensure_owner(&user.id)?;
    if let Some(name) = req.name {
        user.name = name;
    }
    if let Some(email) = req.email.filter(|e| !e.trim().is_empty()) {
        user.email = email;
    }
    if let Some(pw) = req.password.filter(|p| !p.expose_secret().is_empty()) {
        user.password_hash = password::hash_password(&pw)?;
    }
    users.update(&user)?;
    Ok(Json(user))
}

/// Habits go with the account.
async fn delete_user(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Query(params): Query<IdParams>,
) -> ApiResult<()> {
    let users = state.users();
    let user = users.get(&params.id)?;
    auth.ensure_owner(&user.id)?;
    users.delete(&user.id)?;
    tracing::info!(user_id = %user.id, "habitus user deleted");
    Ok(())
}
