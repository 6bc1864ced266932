//! Wire protocol between browser/native clients and the server.
//!
//! Socket frames are JSON objects tagged as `{"event": ..., "data": ...}`.
//! REST bodies use camelCase field names and always carry a `success` flag.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_TEXT_CHARS;
use crate::error::ValidationError;
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Socket events
// ---------------------------------------------------------------------------

/// Frames sent by a client over its socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// One-time handshake binding the connection to an identity.
    #[serde(rename = "authenticate")]
    Authenticate(Handshake),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub user_id: UserId,
    /// Bearer token obtained at login; checked against `user_id` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Snapshot of every identity with at least one live connection.
    #[serde(rename = "getOnlineUser")]
    OnlineUsers(Vec<UserId>),

    /// A message persisted for the receiving identity.
    #[serde(rename = "newMessage")]
    NewMessage(ChatMessage),
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

// ---------------------------------------------------------------------------
// Domain DTOs
// ---------------------------------------------------------------------------

/// A persisted direct message as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Public URL of an uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Public part of an account; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub bio: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.full_name.trim().is_empty() {
            return Err(ValidationError::MissingField("fullName"));
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::MissingField("email"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::MissingField("password"));
        }
        if self.bio.trim().is_empty() {
            return Err(ValidationError::MissingField("bio"));
        }
        validate_email(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// New profile picture as a data URI; uploaded to the blob store.
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if matches!(&self.full_name, Some(name) if name.trim().is_empty()) {
            return Err(ValidationError::MissingField("fullName"));
        }
        Ok(())
    }
}

/// Body of a send request. Text and image are independent; at least one of
/// them must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Raw image data (data URI or base64) to upload before persisting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// Drop blank fields and reject a payload with nothing left.
    pub fn normalized(self) -> Result<Self, ValidationError> {
        let text = self.text.filter(|t| !t.trim().is_empty());
        let image = self.image.filter(|i| !i.trim().is_empty());

        if text.is_none() && image.is_none() {
            return Err(ValidationError::EmptyMessage);
        }
        if let Some(t) = &text {
            let len = t.chars().count();
            if len > MAX_TEXT_CHARS {
                return Err(ValidationError::TextTooLong {
                    len,
                    max: MAX_TEXT_CHARS,
                });
            }
        }

        Ok(Self { text, image })
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::InvalidEmail),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub user_data: UserProfile,
    pub token: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: UserProfile,
}

/// Sidebar listing: every other account plus the authoritative unseen counts
/// (only peers with a non-zero count appear in the map).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarResponse {
    pub success: bool,
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub unseen_messages: HashMap<UserId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub new_message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    /// Number of records updated, where meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EVENT_AUTHENTICATE, EVENT_NEW_MESSAGE, EVENT_ONLINE_USERS};

    #[test]
    fn test_authenticate_wire_shape() {
        let frame = ClientEvent::Authenticate(Handshake {
            user_id: UserId::new(),
            token: Some("t".into()),
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], EVENT_AUTHENTICATE);
        assert_eq!(value["data"]["token"], "t");

        let user_id = UserId::new();
        let raw = format!(r#"{{"event":"authenticate","data":{{"userId":"{user_id}"}}}}"#);
        let ev = ClientEvent::from_json(&raw).unwrap();
        assert_eq!(
            ev,
            ClientEvent::Authenticate(Handshake {
                user_id,
                token: None
            })
        );
    }

    #[test]
    fn test_online_users_wire_shape() {
        let a = UserId::new();
        let json = ServerEvent::OnlineUsers(vec![a]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], EVENT_ONLINE_USERS);
        assert_eq!(value["data"][0], a.to_string());
    }

    #[test]
    fn test_new_message_uses_camel_case() {
        let msg = ChatMessage {
            id: MessageId::new(),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            text: Some("hi".into()),
            image: None,
            seen: false,
            created_at: Utc::now(),
        };
        let json = ServerEvent::NewMessage(msg.clone()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], EVENT_NEW_MESSAGE);
        assert_eq!(value["data"]["senderId"], msg.sender_id.to_string());
        assert!(value["data"].get("image").is_none());
    }

    #[test]
    fn test_empty_payload_rejected() {
        let req = SendMessageRequest {
            text: Some("   ".into()),
            image: Some(String::new()),
        };
        assert_eq!(req.normalized(), Err(ValidationError::EmptyMessage));
    }

    #[test]
    fn test_text_and_image_both_allowed() {
        let req = SendMessageRequest {
            text: Some("look".into()),
            image: Some("data:image/png;base64,AAAA".into()),
        };
        let req = req.normalized().unwrap();
        assert!(req.text.is_some() && req.image.is_some());
    }

    #[test]
    fn test_overlong_text_rejected() {
        let req = SendMessageRequest::text("x".repeat(MAX_TEXT_CHARS + 1));
        assert!(matches!(
            req.normalized(),
            Err(ValidationError::TextTooLong { .. })
        ));
    }

    #[test]
    fn test_signup_requires_all_fields() {
        let req = SignupRequest {
            full_name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "pw".into(),
            bio: String::new(),
        };
        assert_eq!(req.validate(), Err(ValidationError::MissingField("bio")));
    }

    #[test]
    fn test_signup_rejects_bad_email() {
        let req = SignupRequest {
            full_name: "Ada".into(),
            email: "ada".into(),
            password: "pw".into(),
            bio: "hello".into(),
        };
        assert_eq!(req.validate(), Err(ValidationError::InvalidEmail));
    }
}
