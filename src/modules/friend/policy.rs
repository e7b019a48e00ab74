//! Decision table for a new friend request between the session user and a target.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! | edge between the two users                    | outcome                        |
//! |-----------------------------------------------|--------------------------------|
//! | ACCEPTED (any direction)                      | already friends                |
//! | REQUESTED, session user -> target             | already sent                   |
//! | REQUESTED, target -> session user             | accept the crossed request     |
//! | DECLINED, cooldown elapsed                    | re-request, same direction     |
//! | DECLINED, cooldown running                    | must wait                      |
//! | none                                          | create session user -> target  |
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::api::error;
use crate::modules::friend::schema::{FriendStatus, FriendshipEntity};
use crate::modules::user::schema::UserEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// The target already asked; their REQUESTED edge becomes ACCEPTED.
    AcceptCrossed { requester_id: Uuid, requestee_id: Uuid },
    /// A DECLINED edge goes back to REQUESTED, keeping its direction.
    Rerequest { requester_id: Uuid, requestee_id: Uuid },
    /// No edge yet.
    Create { requester_id: Uuid, requestee_id: Uuid },
}

pub fn decide_friend_request(
    session_id: Uuid,
    target: &UserEntity,
    edges: &[FriendshipEntity],
    now: DateTime<Utc>,
    cooldown: TimeDelta,
) -> Result<RequestDecision, error::SystemError> {
    let between: Vec<&FriendshipEntity> = edges
        .iter()
        .filter(|edge| edge.involves(&session_id) && edge.involves(&target.id))
        .collect();

    let with_status = |status: FriendStatus| between.iter().filter(move |e| e.status == status);

    if with_status(FriendStatus::Accepted).next().is_some() {
        return Err(error::SystemError::validation(format!(
            "You are already friends with {}",
            target.username
        )));
    }

    if with_status(FriendStatus::Requested).any(|e| e.is_from(&session_id, &target.id)) {
        return Err(error::SystemError::validation(format!(
            "You have already sent a request to {}",
            target.username
        )));
    }

    if with_status(FriendStatus::Requested).any(|e| e.is_from(&target.id, &session_id)) {
        return Ok(RequestDecision::AcceptCrossed {
            requester_id: target.id,
            requestee_id: session_id,
        });
    }

    if let Some(declined) = with_status(FriendStatus::Declined).next() {
        if now - declined.last_modified >= cooldown {
            return Ok(RequestDecision::Rerequest {
                requester_id: declined.requester_id,
                requestee_id: declined.requestee_id,
            });
        }
        return Err(error::SystemError::validation(format!(
            "You must wait {} before sending another request",
            describe_cooldown(cooldown)
        )));
    }

    Ok(RequestDecision::Create { requester_id: session_id, requestee_id: target.id })
}

/// "5 minutes", "1 minute", "90 seconds".
fn describe_cooldown(cooldown: TimeDelta) -> String {
    let seconds = cooldown.num_seconds();
    let (amount, unit) = if seconds % 60 == 0 { (seconds / 60, "minute") } else { (seconds, "second") };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}
