use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    model::{Credentials, NewUser, ProfileUpdate, User},
    repo::{normalize_referrer, prepare_insert, UserRepository, REDEEMER_BONUS, REFERRER_BONUS},
};
use crate::db::{RepoError, RepoResult};

/// `UserRepository` over a vector, for router tests.
#[derive(Default)]
pub struct MemoryUserRepository {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<User>,
}

impl Inner {
    fn find_mut(&mut self, id: i64) -> RepoResult<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepoError::NotFound)
    }
}

impl MemoryUserRepository {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get_all(&self) -> RepoResult<Vec<User>> {
        let mut users = self.lock().users.clone();
        users.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn get_one(&self, id: i64) -> RepoResult<User> {
        self.lock().find_mut(id).map(|u| u.clone())
    }

    async fn get_by_email(&self, email: &str) -> RepoResult<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn email_check(&self, email: &str) -> RepoResult<Option<Credentials>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| Credentials {
                id: u.id,
                first_name: u.first_name.clone(),
                password: u.password.clone(),
            }))
    }

    async fn insert(&self, user: NewUser) -> RepoResult<i64> {
        let user = prepare_insert(user).await?;
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.email == user.email) {
            return Err(RepoError::DuplicateEmail);
        }
        if user.referrer.is_some() && inner.users.iter().any(|u| u.referrer == user.referrer) {
            return Err(RepoError::DuplicateReferrer);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let now = OffsetDateTime::now_utc();
        inner.users.push(User {
            id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password: user.password,
            active: user.active,
            score: user.score,
            referrer: user.referrer,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update(&self, id: i64, profile: &ProfileUpdate) -> RepoResult<()> {
        let mut inner = self.lock();
        if inner
            .users
            .iter()
            .any(|u| u.id != id && u.email == profile.email)
        {
            return Err(RepoError::DuplicateEmail);
        }
        let user = inner.find_mut(id)?;
        user.email = profile.email.clone();
        user.first_name = profile.first_name.clone();
        user.last_name = profile.last_name.clone();
        user.active = profile.active;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn update_score(&self, id: i64, score: i64) -> RepoResult<()> {
        let mut inner = self.lock();
        let user = inner.find_mut(id)?;
        user.score = score;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn delete_by_id(&self, id: i64) -> RepoResult<()> {
        let mut inner = self.lock();
        let before = inner.users.len();
        inner.users.retain(|u| u.id != id);
        if inner.users.len() == before {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn add_points(&self, id: i64, delta: i64) -> RepoResult<()> {
        let mut inner = self.lock();
        let user = inner.find_mut(id)?;
        user.score += delta;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn redeem_referrer(&self, id: i64, referrer: &str) -> RepoResult<()> {
        let referrer = normalize_referrer(referrer);
        let mut inner = self.lock();
        let owner = inner
            .users
            .iter()
            .find(|u| u.referrer.as_deref() == Some(referrer))
            .map(|u| u.id)
            .ok_or(RepoError::UnknownReferrer)?;
        inner.find_mut(id)?;
        if owner == id {
            return Err(RepoError::SelfReferral);
        }
        let now = OffsetDateTime::now_utc();
        for (target, bonus) in [(owner, REFERRER_BONUS), (id, REDEEMER_BONUS)] {
            let user = inner.find_mut(target)?;
            user.score += bonus;
            user.updated_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(email: &str, referrer: Option<&str>) -> NewUser {
        NewUser {
            email: email.into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            password: "longpass1".into(),
            referrer: referrer.map(Into::into),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ids_are_positive_and_distinct() {
        let repo = MemoryUserRepository::default();
        let a = repo.insert(registration("a@x.com", None)).await.unwrap();
        let b = repo.insert(registration("b@x.com", None)).await.unwrap();
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn short_password_leaves_storage_empty() {
        let repo = MemoryUserRepository::default();
        let mut user = registration("a@x.com", None);
        user.password = "1234567".into();
        assert!(matches!(repo.insert(user).await, Err(RepoError::PasswordTooShort)));
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_referrer_leaves_scores_unchanged() {
        let repo = MemoryUserRepository::default();
        let a = repo.insert(registration("a@x.com", None)).await.unwrap();
        let err = repo.redeem_referrer(a, "NOPE").await.unwrap_err();
        assert!(matches!(err, RepoError::UnknownReferrer));
        assert_eq!(repo.get_one(a).await.unwrap().score, 0);
    }

    #[tokio::test]
    async fn missing_redeemer_is_not_found() {
        let repo = MemoryUserRepository::default();
        let b = repo.insert(registration("b@x.com", Some("REFCODE"))).await.unwrap();
        let err = repo.redeem_referrer(b + 1, "REFCODE").await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
        assert_eq!(repo.get_one(b).await.unwrap().score, 0);
    }

    #[tokio::test]
    async fn update_score_overwrites() {
        let repo = MemoryUserRepository::default();
        let a = repo.insert(registration("a@x.com", None)).await.unwrap();
        repo.add_points(a, 100).await.unwrap();
        repo.update_score(a, 7).await.unwrap();
        assert_eq!(repo.get_one(a).await.unwrap().score, 7);
    }

    #[tokio::test]
    async fn password_matches_is_false_not_error_on_mismatch() {
        let repo = MemoryUserRepository::default();
        repo.insert(registration("a@x.com", None)).await.unwrap();
        let user = repo.get_by_email("a@x.com").await.unwrap();
        assert!(repo.password_matches("longpass1", &user.password).await.unwrap());
        assert!(!repo.password_matches("longpass2", &user.password).await.unwrap());
    }

    #[tokio::test]
    async fn padded_referral_code_is_redeemable_either_way() {
        let repo = MemoryUserRepository::default();
        let a = repo.insert(registration("a@x.com", None)).await.unwrap();
        let b = repo.insert(registration("b@x.com", Some(" REFCODE "))).await.unwrap();
        assert_eq!(repo.get_one(b).await.unwrap().referrer.as_deref(), Some("REFCODE"));

        repo.redeem_referrer(a, " REFCODE ").await.unwrap();
        repo.redeem_referrer(a, "REFCODE").await.unwrap();
        assert_eq!(repo.get_one(b).await.unwrap().score, 200);
        assert_eq!(repo.get_one(a).await.unwrap().score, 50);
    }
}
