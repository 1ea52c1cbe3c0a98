use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod reset_token;
pub mod validate;

pub fn router() -> Router<AppState> {
    Router::new().nest("/users", handlers::user_routes())
}
