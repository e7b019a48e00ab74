use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(type_name = "friend_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FriendStatus {
    Requested,
    Accepted,
    Declined,
}

impl FriendStatus {
    pub const ALL: [FriendStatus; 3] =
        [FriendStatus::Accepted, FriendStatus::Requested, FriendStatus::Declined];
}

/// A directed requester -> requestee edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct FriendshipEntity {
    pub requester_id: Uuid,
    pub requestee_id: Uuid,
    pub status: FriendStatus,
    pub last_modified: DateTime<Utc>,
}

impl FriendshipEntity {
    pub fn involves(&self, user_id: &Uuid) -> bool {
        self.requester_id == *user_id || self.requestee_id == *user_id
    }

    pub fn is_from(&self, requester_id: &Uuid, requestee_id: &Uuid) -> bool {
        self.requester_id == *requester_id && self.requestee_id == *requestee_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRole {
    Requester,
    Requestee,
}

impl EdgeRole {
    pub fn column(self) -> &'static str {
        match self {
            EdgeRole::Requester => "requester_id",
            EdgeRole::Requestee => "requestee_id",
        }
    }

    /// The user holding this role on a given edge.
    pub fn user_on(self, requester_id: &Uuid, requestee_id: &Uuid) -> Uuid {
        match self {
            EdgeRole::Requester => *requester_id,
            EdgeRole::Requestee => *requestee_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeFilter {
    pub role: EdgeRole,
    pub user_id: Uuid,
    pub status: FriendStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeUpdate {
    pub status: FriendStatus,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// Row change as published by the `friendship_changes` notify trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeChange {
    pub op: ChangeOp,
    pub requester_id: Uuid,
    pub requestee_id: Uuid,
    pub status: FriendStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub role: EdgeRole,
    pub user_id: Uuid,
}

impl ChangeFilter {
    pub fn matches(&self, change: &EdgeChange) -> bool {
        self.role.user_on(&change.requester_id, &change.requestee_id) == self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(requester_id: Uuid, requestee_id: Uuid, status: FriendStatus) -> FriendshipEntity {
        FriendshipEntity { requester_id, requestee_id, status, last_modified: Utc::now() }
    }

    #[test]
    fn edge_involves_both_ends() {
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let e = edge(a, b, FriendStatus::Accepted);
        assert!(e.involves(&a) && e.involves(&b));
        assert!(!e.involves(&c));
        assert!(e.is_from(&a, &b) && !e.is_from(&b, &a));
    }

    #[test]
    fn change_payload_matches_trigger_format() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let payload = format!(
            r#"{{"op":"UPDATE","requester_id":"{a}","requestee_id":"{b}","status":"DECLINED"}}"#
        );
        let change: EdgeChange = serde_json::from_str(&payload).unwrap();
        assert_eq!(change.op, ChangeOp::Update);
        assert_eq!(change.status, FriendStatus::Declined);
        assert!(ChangeFilter { role: EdgeRole::Requester, user_id: a }.matches(&change));
        assert!(!ChangeFilter { role: EdgeRole::Requester, user_id: b }.matches(&change));
    }
}
