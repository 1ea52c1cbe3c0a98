use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::repo_types::User;
use crate::{error::AppError, state::AppState};

pub const NOT_LOGGED_IN: &str = "You are not logged in. Please log in to get access.";
pub const INVALID_TOKEN: &str = "Invalid or expired token";
pub const USER_GONE: &str = "The user belonging to this token no longer exists";

/// Resolves the bearer token to the user it was issued for.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Expect "Bearer <token>"
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|auth| {
                auth.strip_prefix("Bearer ")
                    .or_else(|| auth.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized(NOT_LOGGED_IN.into()))?;

        let claims = state.keys.verify(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::Unauthorized(INVALID_TOKEN.into())
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token subject no longer exists");
                AppError::Unauthorized(USER_GONE.into())
            })?;

        Ok(CurrentUser(user))
    }
}
