use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod middleware;
pub mod password;
pub mod sessions;
pub mod tokens;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
