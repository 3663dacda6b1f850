use std::{future::Future, path::Path, time::Duration};

use anyhow::Context;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Failure of a repository operation.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user does not exist")]
    NotFound,

    #[error("referrer does not exist")]
    UnknownReferrer,

    #[error("user cannot redeem their own referrer")]
    SelfReferral,

    #[error("password must be at least 8 characters long")]
    PasswordTooShort,

    #[error("email is already registered")]
    DuplicateEmail,

    #[error("referrer is already taken")]
    DuplicateReferrer,

    #[error("database operation timed out")]
    Timeout,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepoError {
    /// Caller-caused failures, as opposed to infrastructure ones.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound
                | RepoError::UnknownReferrer
                | RepoError::SelfReferral
                | RepoError::PasswordTooShort
                | RepoError::DuplicateEmail
                | RepoError::DuplicateReferrer
        )
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Runs `fut` under `limit`; the future is dropped (and its query cancelled)
/// when the limit elapses.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> RepoResult<T>
where
    F: Future<Output = RepoResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RepoError::Timeout)?
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

pub async fn connect_with_retry(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let attempts = cfg.connect_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(cfg.query_timeout)
            .connect(&cfg.url)
            .await;
        match result {
            Ok(pool) => {
                info!(attempt, "connected to postgres");
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                let delay = backoff_delay(cfg.connect_backoff, attempt);
                warn!(error = %e, attempt, max_attempts = attempts, ?delay, "postgres not yet ready, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("connect to database after {attempts} attempts"));
            }
        }
    }
}

static EMBEDDED_MIGRATIONS: Migrator = sqlx::migrate!("./migrations");

pub async fn run_migrations(pool: &PgPool, dir: Option<&str>) -> anyhow::Result<()> {
    match dir {
        Some(dir) => {
            info!(dir, "applying migrations from directory");
            Migrator::new(Path::new(dir))
                .await
                .with_context(|| format!("load migrations from {dir}"))?
                .run(pool)
                .await
                .context("run migrations")?;
        }
        None => {
            info!("applying embedded migrations");
            EMBEDDED_MIGRATIONS.run(pool).await.context("run migrations")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let res: RepoResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(RepoError::Timeout)));
    }

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let res = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(RepoError::NotFound.is_client_error());
        assert!(RepoError::SelfReferral.is_client_error());
        assert!(!RepoError::Timeout.is_client_error());
        assert!(!RepoError::Hash("x".into()).is_client_error());
    }
}
