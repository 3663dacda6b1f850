use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{DeleteUserRequest, PromoRequest, ReferrerRequest, Task},
    model::{ProfileUpdate, User},
};
use crate::{
    auth::middleware::AuthUser,
    error::{ApiError, JsonResponse},
    extract::{Payload, UserIdPath},
    state::AppState,
};

type Accepted<T = ()> = (StatusCode, Json<JsonResponse<T>>);

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/leaderboard", get(leaderboard))
        .route("/users/deleteUser", post(delete_user))
        .route("/users/:id/status", get(retrieve_one))
        .route("/users/:id/task/telegramSign", post(complete_telegram_sign))
        .route("/users/:id/task/XSign", post(complete_x_sign))
        .route("/users/:id/task/complete", post(complete_generic_task))
        .route("/users/:id/referrer", post(redeem_referrer))
        .route("/users/:id/kuarhodron", post(kuarhodron))
        .route("/users/:id/profile", put(update_profile))
}

fn accepted(message: impl Into<String>) -> Accepted {
    (StatusCode::ACCEPTED, Json(JsonResponse::message(message)))
}

#[instrument(skip(state))]
pub async fn retrieve_one(
    State(state): State<AppState>,
    UserIdPath(id): UserIdPath,
) -> Result<Accepted<User>, ApiError> {
    let user = state
        .users
        .get_one(id)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't fetch user"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::with_data(
            "Retrieved one user from the database",
            user,
        )),
    ))
}

#[instrument(skip(state))]
pub async fn leaderboard(State(state): State<AppState>) -> Result<Accepted<Vec<User>>, ApiError> {
    let users = state
        .users
        .get_all()
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't fetch all users"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::with_data("Fetched all users", users)),
    ))
}

async fn award_points(state: &AppState, id: i64, points: i64) -> Result<Accepted, ApiError> {
    state
        .users
        .add_points(id, points)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't add points to the user"))?;

    info!(user_id = id, points, "points awarded");
    Ok(accepted(format!(
        "complete task worked for user with id {id}, added points {points}"
    )))
}

async fn complete_task(
    state: &AppState,
    auth: AuthUser,
    id: i64,
    task: Task,
) -> Result<Accepted, ApiError> {
    auth.check_target(state.config.identity_policy, id)?;
    award_points(state, id, task.points()).await
}

#[instrument(skip(state))]
pub async fn complete_telegram_sign(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
) -> Result<Accepted, ApiError> {
    complete_task(&state, auth, id, Task::TelegramSign).await
}

#[instrument(skip(state))]
pub async fn complete_x_sign(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
) -> Result<Accepted, ApiError> {
    complete_task(&state, auth, id, Task::XSign).await
}

#[instrument(skip(state))]
pub async fn complete_generic_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
) -> Result<Accepted, ApiError> {
    complete_task(&state, auth, id, Task::Generic).await
}

/// Promo bonus. A wrong code changes nothing and answers an empty 200.
#[instrument(skip(state, payload))]
pub async fn kuarhodron(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
    Payload(payload): Payload<PromoRequest>,
) -> Result<Response, ApiError> {
    auth.check_target(state.config.identity_policy, id)?;

    let promo = &state.config.promo;
    if payload.water_password != promo.code {
        warn!(user_id = id, "promo code mismatch");
        return Ok(StatusCode::OK.into_response());
    }
    Ok(award_points(&state, id, promo.bonus).await?.into_response())
}

#[instrument(skip(state, payload))]
pub async fn redeem_referrer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
    Payload(payload): Payload<ReferrerRequest>,
) -> Result<Accepted, ApiError> {
    auth.check_target(state.config.identity_policy, id)?;

    state
        .users
        .redeem_referrer(id, &payload.referrer)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't redeem referrer"))?;

    info!(user_id = id, "referrer redeemed");
    Ok(accepted("Referrer redeemed"))
}

#[instrument(skip(state, payload))]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Payload(payload): Payload<DeleteUserRequest>,
) -> Result<Accepted, ApiError> {
    auth.check_target(state.config.identity_policy, payload.id)?;

    state
        .users
        .delete_by_id(payload.id)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't delete user"))?;

    info!(user_id = payload.id, "user deleted");
    Ok(accepted("User deleted successfully"))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    UserIdPath(id): UserIdPath,
    Payload(mut payload): Payload<ProfileUpdate>,
) -> Result<Accepted, ApiError> {
    auth.check_target(state.config.identity_policy, id)?;

    payload.email = payload.email.trim().to_lowercase();
    if !crate::auth::handlers::is_valid_email(&payload.email) {
        return Err(ApiError::bad_request("invalid email"));
    }

    state
        .users
        .update(id, &payload)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't update user"))?;

    info!(user_id = id, "profile updated");
    Ok(accepted("User updated successfully"))
}
