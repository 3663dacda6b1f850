use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing, default)]
    pub password: String, // Argon2 PHC string, never exposed in JSON
    pub active: i32,
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Registration input; `password` is still plaintext here.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub active: i32,
    pub score: i64,
    pub referrer: Option<String>,
}

/// Profile fields overwritten by `UserRepository::update`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub active: i32,
}

/// What login needs to know about an email's owner.
#[derive(Debug, Clone, FromRow)]
pub struct Credentials {
    pub id: i64,
    pub first_name: String,
    pub password: String,
}
