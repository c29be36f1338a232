use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use devcollab_core::ids::UserId;
use devcollab_store::users::{UserRepo, UserRow};

use crate::error::{ApiError, AuthError};
use crate::server::HabitusState;

/// The user named by a valid bearer token.
#[derive(Clone, Debug)]
pub struct AuthUser(pub UserRow);

impl AuthUser {
    pub fn id(&self) -> &UserId {
        &self.0.id
    }

    /// Only the caller may act on `owner`'s data.
    pub fn ensure_owner(&self, owner: &UserId) -> Result<(), ApiError> {
        if owner == self.id() {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.id(), owner = %owner, "cross-user access refused");
            Err(ApiError::Forbidden("Access to another user's data".into()))
        }
    }
}

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<HabitusState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HabitusState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts).ok_or(AuthError::MissingToken)?;
        let claims = state
            .tokens
            .verify(token)
            .map_err(|_| AuthError::InvalidToken)?;
        let user = UserRepo::new(state.db.clone())
            .find_by_email(&claims.sub)?
            .ok_or(AuthError::UnknownSubject)?;
        Ok(Self(user))
    }
}
