use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{with_timeout, RepoResult};

/// A persisted refresh token; only the hash of the secret is kept.
#[derive(Debug, Clone, FromRow)]
pub struct StoredRefreshToken {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Stores `token` and drops the user's already-expired rows.
    async fn save(&self, id: Uuid, token: StoredRefreshToken) -> RepoResult<()>;
    /// Removes the row and returns it, so each token can be presented once.
    async fn take(&self, id: Uuid) -> RepoResult<Option<StoredRefreshToken>>;
}

/// Cookie value: `<row id>.<plaintext token>`. Base64 never contains `.`.
pub fn encode_cookie_value(id: Uuid, token: &str) -> String {
    format!("{id}.{token}")
}

pub fn decode_cookie_value(value: &str) -> Option<(Uuid, &str)> {
    let (id, token) = value.split_once('.')?;
    let id = Uuid::parse_str(id).ok()?;
    (!token.is_empty()).then_some((id, token))
}

#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn insert_row(&self, id: Uuid, token: StoredRefreshToken) -> RepoResult<()> {
        sqlx::query(
            r#"
            WITH purged AS (
                DELETE FROM refresh_tokens
                WHERE user_id = $2 AND expires_at <= now()
            )
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_returning(&self, id: Uuid) -> RepoResult<Option<StoredRefreshToken>> {
        let row = sqlx::query_as::<_, StoredRefreshToken>(
            r#"
            DELETE FROM refresh_tokens
            WHERE id = $1
            RETURNING user_id, token_hash, expires_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn save(&self, id: Uuid, token: StoredRefreshToken) -> RepoResult<()> {
        with_timeout(self.timeout, self.insert_row(id, token)).await
    }

    async fn take(&self, id: Uuid) -> RepoResult<Option<StoredRefreshToken>> {
        with_timeout(self.timeout, self.delete_returning(id)).await
    }
}
