use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::model::{Credentials, NewUser, ProfileUpdate, User};
use crate::{
    auth::password::{hash_password, spawn_hashing, verify_password},
    db::{with_timeout, RepoError, RepoResult},
};

pub const MIN_PASSWORD_LEN: usize = 8;
/// Credited to the owner of a redeemed referral code.
pub const REFERRER_BONUS: i64 = 100;
/// Credited to the user redeeming a referral code.
pub const REDEEMER_BONUS: i64 = 25;

pub fn password_long_enough(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}

/// Referral codes are compared and stored without surrounding whitespace.
pub fn normalize_referrer(code: &str) -> &str {
    code.trim()
}

/// Validates and hashes a registration before any storage access.
pub async fn prepare_insert(mut user: NewUser) -> RepoResult<NewUser> {
    if !password_long_enough(&user.password) {
        return Err(RepoError::PasswordTooShort);
    }
    let plain = std::mem::take(&mut user.password);
    user.password = spawn_hashing(move || hash_password(&plain))
        .await
        .map_err(|e| RepoError::Hash(e.to_string()))?;
    user.referrer = user
        .referrer
        .as_deref()
        .map(normalize_referrer)
        .filter(|r| !r.is_empty())
        .map(str::to_owned);
    Ok(user)
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Leaderboard order: score descending.
    async fn get_all(&self) -> RepoResult<Vec<User>>;
    async fn get_one(&self, id: i64) -> RepoResult<User>;
    async fn get_by_email(&self, email: &str) -> RepoResult<User>;
    async fn email_check(&self, email: &str) -> RepoResult<Option<Credentials>>;
    async fn insert(&self, user: NewUser) -> RepoResult<i64>;
    async fn update(&self, id: i64, profile: &ProfileUpdate) -> RepoResult<()>;
    async fn update_score(&self, id: i64, score: i64) -> RepoResult<()>;
    async fn delete_by_id(&self, id: i64) -> RepoResult<()>;
    async fn add_points(&self, id: i64, delta: i64) -> RepoResult<()>;
    /// Credits the code's owner and the redeemer, both or neither.
    async fn redeem_referrer(&self, id: i64, referrer: &str) -> RepoResult<()>;

    /// `Ok(false)` for a wrong password; errors only for a malformed hash.
    async fn password_matches(&self, plain: &str, password_hash: &str) -> RepoResult<bool> {
        let (plain, password_hash) = (plain.to_owned(), password_hash.to_owned());
        spawn_hashing(move || verify_password(&plain, &password_hash))
            .await
            .map_err(|e| RepoError::Hash(e.to_string()))
    }
}

fn map_unique_violation(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(c) if c.contains("referrer") => RepoError::DuplicateReferrer,
                _ => RepoError::DuplicateEmail,
            };
        }
    }
    RepoError::Database(e)
}

fn expect_one_row(affected: u64) -> RepoResult<()> {
    if affected == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgUserRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn fetch_all(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, password, active, score, referrer,
                   created_at, updated_at
            FROM users
            ORDER BY score DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn fetch_one(&self, id: i64) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, password, active, score, referrer,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound)
    }

    async fn fetch_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, password, active, score, referrer,
                   created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn fetch_credentials(&self, email: &str) -> RepoResult<Option<Credentials>> {
        let creds = sqlx::query_as::<_, Credentials>(
            r#"SELECT id, first_name, password FROM users WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(creds)
    }

    async fn insert_row(&self, user: NewUser) -> RepoResult<i64> {
        let now = OffsetDateTime::now_utc();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (email, first_name, last_name, password, active, score, referrer,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING id
            "#,
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password)
        .bind(user.active)
        .bind(user.score)
        .bind(&user.referrer)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(id)
    }

    async fn update_row(&self, id: i64, profile: &ProfileUpdate) -> RepoResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
            SET email = $1, first_name = $2, last_name = $3, active = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.active)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        expect_one_row(res.rows_affected())
    }

    async fn set_score(&self, id: i64, score: i64) -> RepoResult<()> {
        let res = sqlx::query(r#"UPDATE users SET score = $1, updated_at = $2 WHERE id = $3"#)
            .bind(score)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one_row(res.rows_affected())
    }

    async fn delete_row(&self, id: i64) -> RepoResult<()> {
        let res = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one_row(res.rows_affected())
    }

    async fn increment_score(&self, id: i64, delta: i64) -> RepoResult<()> {
        let res = sqlx::query(
            r#"UPDATE users SET score = score + $1, updated_at = $2 WHERE id = $3"#,
        )
        .bind(delta)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;
        expect_one_row(res.rows_affected())
    }

    async fn redeem_in_tx(&self, id: i64, referrer: &str) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        // Both rows are locked in id order so opposite redemptions cannot deadlock.
        let rows = sqlx::query_as::<_, (i64, Option<String>)>(
            r#"
            SELECT id, referrer
            FROM users
            WHERE id = $1 OR referrer = $2
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(referrer)
        .fetch_all(&mut *tx)
        .await?;

        let owner = rows
            .iter()
            .find(|(_, code)| code.as_deref() == Some(referrer))
            .map(|(owner, _)| *owner)
            .ok_or(RepoError::UnknownReferrer)?;
        if !rows.iter().any(|(row_id, _)| *row_id == id) {
            return Err(RepoError::NotFound);
        }
        if owner == id {
            return Err(RepoError::SelfReferral);
        }

        let now = OffsetDateTime::now_utc();
        for (target, bonus) in [(owner, REFERRER_BONUS), (id, REDEEMER_BONUS)] {
            let res = sqlx::query(
                r#"UPDATE users SET score = score + $1, updated_at = $2 WHERE id = $3"#,
            )
            .bind(bonus)
            .bind(now)
            .bind(target)
            .execute(&mut *tx)
            .await?;
            expect_one_row(res.rows_affected())?;
        }

        tx.commit().await?;
        debug!(user_id = id, owner_id = owner, "referrer redeemed");
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_all(&self) -> RepoResult<Vec<User>> {
        with_timeout(self.timeout, self.fetch_all()).await
    }

    async fn get_one(&self, id: i64) -> RepoResult<User> {
        with_timeout(self.timeout, self.fetch_one(id)).await
    }

    async fn get_by_email(&self, email: &str) -> RepoResult<User> {
        with_timeout(self.timeout, self.fetch_by_email(email))
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn email_check(&self, email: &str) -> RepoResult<Option<Credentials>> {
        with_timeout(self.timeout, self.fetch_credentials(email)).await
    }

    async fn insert(&self, user: NewUser) -> RepoResult<i64> {
        let user = prepare_insert(user).await?;
        let res = with_timeout(self.timeout, self.insert_row(user)).await;
        if let Err(e) = &res {
            warn!(error = %e, "failed to insert new user");
        }
        res
    }

    async fn update(&self, id: i64, profile: &ProfileUpdate) -> RepoResult<()> {
        with_timeout(self.timeout, self.update_row(id, profile)).await
    }

    async fn update_score(&self, id: i64, score: i64) -> RepoResult<()> {
        with_timeout(self.timeout, self.set_score(id, score)).await
    }

    async fn delete_by_id(&self, id: i64) -> RepoResult<()> {
        with_timeout(self.timeout, self.delete_row(id)).await
    }

    async fn add_points(&self, id: i64, delta: i64) -> RepoResult<()> {
        with_timeout(self.timeout, self.increment_score(id, delta)).await
    }

    async fn redeem_referrer(&self, id: i64, referrer: &str) -> RepoResult<()> {
        with_timeout(self.timeout, self.redeem_in_tx(id, normalize_referrer(referrer))).await
    }
}
