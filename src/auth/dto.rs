use serde::{Deserialize, Serialize};

/// Request body for `POST /registrate`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// Request body for `POST /authenticate`.
#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct Registered {
    pub id: i64,
}
