use std::time::Duration;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{AuthenticateRequest, Registered, RegisterRequest},
    password::spawn_hashing,
    sessions::{decode_cookie_value, encode_cookie_value, StoredRefreshToken},
    tokens::{issue_refresh_token, verify_refresh_token, JwtKeys},
    ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::{
    error::{ApiError, JsonResponse},
    extract::Payload,
    state::AppState,
    users::{model::NewUser, repo::password_long_enough},
};

type SessionResponse = (StatusCode, CookieJar, Json<JsonResponse<()>>);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/registrate", post(registrate))
        .route("/authenticate", post(authenticate))
        .route("/refresh", post(refresh))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn session_cookie(name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
    let ttl = time::Duration::seconds(ttl.as_secs() as i64);
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(ttl)
        .expires(OffsetDateTime::now_utc() + ttl)
        .build()
}

/// Signs an access token, persists a fresh refresh-token hash and sets both
/// cookies on `jar`.
async fn start_session(state: &AppState, jar: CookieJar, user_id: i64) -> Result<CookieJar, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user_id).map_err(|e| {
        error!(error = %e, user_id, "jwt sign access failed");
        ApiError::Internal
    })?;
    let (refresh_token, refresh_hash) = spawn_hashing(issue_refresh_token).await.map_err(|e| {
        error!(error = %e, user_id, "refresh token generation failed");
        ApiError::Internal
    })?;

    let row_id = Uuid::new_v4();
    let stored = StoredRefreshToken {
        user_id,
        token_hash: refresh_hash,
        expires_at: OffsetDateTime::now_utc()
            + time::Duration::seconds(keys.refresh_ttl.as_secs() as i64),
    };
    state.sessions.save(row_id, stored).await.map_err(|e| {
        error!(error = %e, user_id, "failed to persist refresh token");
        ApiError::Internal
    })?;

    Ok(jar
        .add(session_cookie(ACCESS_COOKIE, access_token, keys.access_ttl))
        .add(session_cookie(
            REFRESH_COOKIE,
            encode_cookie_value(row_id, &refresh_token),
            keys.refresh_ttl,
        )))
}

#[instrument(skip(state, payload))]
pub async fn registrate(
    State(state): State<AppState>,
    Payload(mut payload): Payload<RegisterRequest>,
) -> Result<(StatusCode, Json<JsonResponse<Registered>>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::bad_request("invalid email"));
    }

    if !password_long_enough(&payload.password) {
        warn!("password too short");
        return Err(ApiError::bad_request(
            "password must be at least 8 characters long",
        ));
    }

    let new_user = NewUser {
        email: payload.email,
        first_name: payload.first_name,
        last_name: payload.last_name,
        password: payload.password,
        active: payload.active,
        score: payload.score,
        referrer: payload.referrer,
    };
    let id = state
        .users
        .insert(new_user)
        .await
        .map_err(|e| ApiError::from_repo(e, "couldn't create user"))?;

    info!(user_id = id, "user registered");
    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::with_data(
            format!("Successfully created new user, id: {id}"),
            Registered { id },
        )),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn authenticate(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(mut payload): Payload<AuthenticateRequest>,
) -> Result<SessionResponse, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    // Unknown email and lookup failure answer the same way.
    let creds = match state.users.email_check(&payload.email).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            warn!(email = %payload.email, "login unknown email");
            return Err(ApiError::bad_request("user with this email does not exist"));
        }
        Err(e) => {
            error!(error = %e, "email_check failed");
            return Err(ApiError::bad_request("user with this email does not exist"));
        }
    };

    match state
        .users
        .password_matches(&payload.password, &creds.password)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(user_id = creds.id, "login invalid password");
            return Err(ApiError::bad_request("invalid password"));
        }
        Err(e) => {
            error!(error = %e, user_id = creds.id, "password_matches failed");
            return Err(ApiError::bad_request("invalid password"));
        }
    }

    let jar = start_session(&state, jar, creds.id).await?;

    info!(user_id = creds.id, "user logged in");
    Ok((
        StatusCode::ACCEPTED,
        jar,
        Json(JsonResponse::message(format!(
            "Welcome back, {}!",
            creds.first_name
        ))),
    ))
}

#[instrument(skip(state, jar))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<SessionResponse, ApiError> {
    let raw = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| ApiError::unauthorized("missing refresh token"))?;
    let (row_id, token) =
        decode_cookie_value(&raw).ok_or_else(|| ApiError::unauthorized("invalid refresh token"))?;

    let stored = state
        .sessions
        .take(row_id)
        .await
        .map_err(|e| {
            error!(error = %e, "refresh token lookup failed");
            ApiError::Internal
        })?
        .ok_or_else(|| ApiError::unauthorized("invalid refresh token"))?;

    if stored.expires_at <= OffsetDateTime::now_utc() {
        warn!(user_id = stored.user_id, "expired refresh token presented");
        return Err(ApiError::unauthorized("refresh token expired"));
    }
    let (token_hash, token) = (stored.token_hash.clone(), token.to_owned());
    spawn_hashing(move || verify_refresh_token(&token_hash, &token))
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = stored.user_id, "refresh token mismatch");
            ApiError::unauthorized("invalid refresh token")
        })?;

    let jar = start_session(&state, jar, stored.user_id).await?;

    info!(user_id = stored.user_id, "session refreshed");
    Ok((
        StatusCode::ACCEPTED,
        jar,
        Json(JsonResponse::message("Session refreshed")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("no at sign.com"));
    }

    #[test]
    fn session_cookie_flags() {
        let cookie = session_cookie(ACCESS_COOKIE, "v".into(), Duration::from_secs(15 * 60));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(15)));
    }
}
