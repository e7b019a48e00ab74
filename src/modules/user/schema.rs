use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

/// Presence as written by the presence system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(type_name = "user_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Online,
    Working,
    Offline,
}

impl UserStatus {
    /// Working users still count as online in the friends list.
    pub fn is_online(self) -> bool {
        matches!(self, UserStatus::Online | UserStatus::Working)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub username: String,
    pub status: UserStatus,
}
