mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod repo;

use crate::{auth::middleware::require_access_token, state::AppState};
use axum::{middleware, Router};

/// Every route here sits behind the access-token gate.
pub fn router(state: AppState) -> Router<AppState> {
    handlers::user_routes().route_layer(middleware::from_fn_with_state(
        state,
        require_access_token,
    ))
}
