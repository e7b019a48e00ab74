use std::borrow::Cow;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::constants::Env;
use crate::modules::user::schema::{UserEntity, UserStatus};
use crate::utils::notice::Notice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendResponse {
    pub id: Uuid,
    pub username: String,
    pub status: UserStatus,
}

impl From<UserEntity> for FriendResponse {
    fn from(user: UserEntity) -> Self {
        FriendResponse { id: user.id, username: user.username, status: user.status }
    }
}

/// Lists derived from the store for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FriendsView {
    pub online_friends: Vec<FriendResponse>,
    pub offline_friends: Vec<FriendResponse>,
    pub requests: Vec<FriendResponse>,
}

impl FriendsView {
    pub fn from_users(friends: Vec<UserEntity>, requesters: Vec<UserEntity>) -> Self {
        let (online, offline): (Vec<_>, Vec<_>) =
            friends.into_iter().partition(|user| user.status.is_online());

        FriendsView {
            online_friends: online.into_iter().map(FriendResponse::from).collect(),
            offline_friends: offline.into_iter().map(FriendResponse::from).collect(),
            requests: requesters.into_iter().map(FriendResponse::from).collect(),
        }
    }
}

/// What the rendering surface gets to see of a mounted panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSnapshot {
    pub online_friends: Vec<FriendResponse>,
    pub offline_friends: Vec<FriendResponse>,
    pub requests: Vec<FriendResponse>,
    pub input: String,
    pub busy: bool,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRequestOutcome {
    FriendAdded,
    RequestSent,
}

impl FriendRequestOutcome {
    pub fn message(self) -> Cow<'static, str> {
        match self {
            FriendRequestOutcome::FriendAdded => "Friend added".into(),
            FriendRequestOutcome::RequestSent => "Friend request sent".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendsConfig {
    pub request_cooldown: TimeDelta,
    pub notice_duration: std::time::Duration,
    /// A panel with no live view is unmounted after this long without use.
    pub panel_idle: std::time::Duration,
}

impl FriendsConfig {
    pub fn from_env(env: &Env) -> Self {
        FriendsConfig {
            request_cooldown: TimeDelta::seconds(env.request_cooldown_secs),
            notice_duration: std::time::Duration::from_millis(env.notice_duration_ms),
            panel_idle: std::time::Duration::from_secs(env.panel_idle_secs),
        }
    }
}

impl Default for FriendsConfig {
    fn default() -> Self {
        FriendsConfig {
            request_cooldown: TimeDelta::minutes(5),
            notice_duration: std::time::Duration::from_millis(1500),
            panel_idle: std::time::Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FriendInputBody {
    #[validate(length(max = 64, message = "Username must be at most 64 characters long"))]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitFriendRequestBody {
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters long"))]
    pub username: Option<String>,
}
