use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use base64ct::{Base64, Encoding};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::password::{hash_password, verify_password};
use crate::{config::JwtConfig, state::AppState};

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn sign_access(&self, user_id: i64) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.access_ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::new(Algorithm::HS512), &claims, &self.encoding)?;
        debug!(user_id, "access token signed");
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> anyhow::Result<Claims> {
        let validation = Validation::new(Algorithm::HS512);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = data.claims.sub, "access token verified");
        Ok(data.claims)
    }
}

/// Returns `(plaintext, hashed)`. Only `hashed` may be persisted.
pub fn issue_refresh_token() -> anyhow::Result<(String, String)> {
    let mut raw = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    let token = Base64::encode_string(&raw);
    let phc = hash_password(&token)?;
    Ok((token, Base64::encode_string(phc.as_bytes())))
}

pub fn verify_refresh_token(hashed: &str, token: &str) -> anyhow::Result<()> {
    let decoded =
        Base64::decode_vec(hashed).map_err(|e| anyhow::anyhow!("decode refresh hash: {e}"))?;
    let phc = String::from_utf8(decoded).context("refresh hash is not utf-8")?;
    if !verify_password(token, &phc)? {
        anyhow::bail!("invalid refresh token");
    }
    Ok(())
}
