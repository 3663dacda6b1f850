use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReferrerRequest {
    pub referrer: String,
}

#[derive(Debug, Deserialize)]
pub struct PromoRequest {
    pub water_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub id: i64,
}

/// Client-asserted actions worth a fixed number of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    TelegramSign,
    XSign,
    Generic,
}

impl Task {
    pub fn points(self) -> i64 {
        match self {
            Task::TelegramSign => 50,
            Task::XSign => 75,
            Task::Generic => 100,
        }
    }
}
