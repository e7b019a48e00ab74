use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::modules::friend::model::{FriendInputBody, PanelSnapshot, SubmitFriendRequestBody};

/// Messages sent by the client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    SetInput { value: String },

    /// Submits `username` if given, otherwise the current input buffer
    #[serde(rename_all = "camelCase")]
    SubmitFriendRequest { username: Option<String> },

    #[serde(rename_all = "camelCase")]
    RespondToRequest { requester_id: Uuid, accept: bool },

    Refresh,

    Ping,
}

impl ClientMessage {
    /// Applies the limits of the matching HTTP request body.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            ClientMessage::SetInput { value } => {
                FriendInputBody { value: value.clone() }.validate()
            }
            ClientMessage::SubmitFriendRequest { username } => {
                SubmitFriendRequestBody { username: username.clone() }.validate()
            }
            ClientMessage::RespondToRequest { .. } | ClientMessage::Refresh | ClientMessage::Ping => {
                Ok(())
            }
        }
    }
}

/// Messages sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Snapshot { panel: PanelSnapshot },

    #[serde(rename_all = "camelCase")]
    Error { message: String },

    Pong,
}

impl ServerMessage {
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("Could not serialize ServerMessage: {}", e);
                None
            }
        }
    }
}
