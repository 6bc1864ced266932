//! Domain model structs persisted in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use natter_shared::protocol::{ChatMessage, UserProfile};
use natter_shared::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An account. `password_hash` never leaves the server; convert to
/// [`UserProfile`] before handing a user to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub bio: String,
    pub profile_pic: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            full_name: u.full_name,
            bio: u.bio,
            profile_pic: u.profile_pic,
            created_at: u.created_at,
        }
    }
}

/// Fields that may change on a profile update; `None` keeps the old value.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted direct message. Only `seen` ever changes after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ChatMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            text: m.text,
            image: m.image,
            seen: m.seen,
            created_at: m.created_at,
        }
    }
}

/// Input to [`Database::create_message`](crate::Database::create_message).
/// Id, timestamp and the seen flag are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
}
