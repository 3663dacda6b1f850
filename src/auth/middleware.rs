use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::{tokens::JwtKeys, ACCESS_COOKIE};
use crate::{config::IdentityPolicy, error::ApiError};

/// Identity proven by the access-token cookie, placed in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

impl AuthUser {
    /// Applies `policy` when the token subject is not the user being acted on.
    pub fn check_target(self, policy: IdentityPolicy, target: i64) -> Result<(), ApiError> {
        if self.0 == target {
            return Ok(());
        }
        match policy {
            IdentityPolicy::Strict => {
                warn!(subject = self.0, target, "rejected request on another user's account");
                Err(ApiError::Forbidden("cannot act on another user".into()))
            }
            IdentityPolicy::Permissive => {
                warn!(subject = self.0, target, "token subject differs from target user");
                Ok(())
            }
        }
    }
}

pub async fn require_access_token(
    State(keys): State<JwtKeys>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| ApiError::unauthorized("missing access token"))?;

    let claims = keys.verify_access(&token).map_err(|e| {
        warn!(error = %e, "invalid or expired access token");
        ApiError::unauthorized("invalid or expired token")
    })?;

    req.extensions_mut().insert(AuthUser(claims.sub));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn matching_subject_passes_any_policy() {
        assert!(AuthUser(3).check_target(IdentityPolicy::Strict, 3).is_ok());
        assert!(AuthUser(3).check_target(IdentityPolicy::Permissive, 3).is_ok());
    }

    #[test]
    fn mismatch_is_forbidden_only_when_strict() {
        let err = AuthUser(3).check_target(IdentityPolicy::Strict, 4).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(AuthUser(3).check_target(IdentityPolicy::Permissive, 4).is_ok());
    }
}
