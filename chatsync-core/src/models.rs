//! Chat Data Model
//!
//! Documents owned by the backend store ([`ChatRecord`], [`UserProfile`],
//! [`Message`]) and the derived [`ChatPreview`] shown in the chat list.
//!
//! Field names serialize in camelCase so the JSON matches the documents the
//! hosted store keeps (`lastMessage`, `chatKey`, ...).

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as milliseconds since the UNIX epoch
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// A chat between two users, as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    /// Opaque document ID
    pub id: String,

    /// Participant user IDs (exactly two in well-formed data)
    pub users: Vec<String>,

    /// Sorted participant IDs joined with `_`, used to find an existing chat
    #[serde(default)]
    pub chat_key: String,

    /// Text of the latest message, empty for a fresh chat
    #[serde(default)]
    pub last_message: String,

    /// Last activity (ms since epoch)
    pub timestamp: i64,
}

impl ChatRecord {
    /// Create a chat record between two users
    pub fn new(
        id: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
        last_message: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let first = first.into();
        let second = second.into();
        let chat_key = crate::directory::chat_key(&first, &second);

        Self {
            id: id.into(),
            users: vec![first, second],
            chat_key,
            last_message: last_message.into(),
            timestamp,
        }
    }

    /// Whether `uid` is one of the participants
    pub fn involves(&self, uid: &str) -> bool {
        self.users.iter().any(|u| u == uid)
    }
}

/// A user's public profile document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User ID (same as the auth provider's uid)
    pub uid: String,

    /// Display name, unique across users
    pub username: String,

    /// Contact address
    pub email: String,

    /// Account creation time (ms since epoch)
    pub timestamp: i64,
}

impl UserProfile {
    /// Create a profile stamped with the current time
    pub fn new(
        uid: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            username: username.into(),
            email: email.into(),
            timestamp: current_timestamp(),
        }
    }

    /// Case-insensitive substring match against username or email
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.username.to_lowercase().contains(&query) || self.email.to_lowercase().contains(&query)
    }
}

/// A single message inside a chat thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender user ID
    pub sender: String,

    /// Message text
    pub text: String,

    /// Send time (ms since epoch)
    pub timestamp: i64,
}

impl Message {
    /// Create a message sent now
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_timestamp(sender, text, current_timestamp())
    }

    /// Create a message with an explicit timestamp
    pub fn with_timestamp(
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Whether this message was sent by `uid`
    pub fn is_from(&self, uid: &str) -> bool {
        self.sender == uid
    }
}

/// Chat list entry derived from a [`ChatRecord`] and the counterpart's profile
///
/// Never persisted; rebuilt from every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreview {
    /// Chat document ID
    pub chat_id: String,

    /// The participant that is not the current user
    pub other_user_id: String,

    /// Counterpart display name
    pub other_username: String,

    /// Latest message text
    pub last_message: String,

    /// Last activity (ms since epoch)
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_record_new() {
        let record = ChatRecord::new("c1", "u2", "u1", "", 100);
        assert_eq!(record.users, vec!["u2".to_string(), "u1".to_string()]);
        assert_eq!(record.chat_key, "u1_u2");
        assert!(record.involves("u1"));
        assert!(!record.involves("u3"));
    }

    #[test]
    fn test_chat_record_json_field_names() {
        let record = ChatRecord::new("c1", "u1", "u2", "hi", 100);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["lastMessage"], json!("hi"));
        assert_eq!(value["chatKey"], json!("u1_u2"));
        assert_eq!(value["users"], json!(["u1", "u2"]));
    }

    #[test]
    fn test_chat_record_missing_optional_fields() {
        let record: ChatRecord = serde_json::from_value(json!({
            "id": "c9",
            "users": ["a", "b"],
            "timestamp": 5
        }))
        .unwrap();

        assert_eq!(record.last_message, "");
        assert_eq!(record.chat_key, "");
    }

    #[test]
    fn test_profile_matches() {
        let profile = UserProfile::new("u2", "bob", "Bob@Example.com");
        assert!(profile.matches("BO"));
        assert!(profile.matches("example"));
        assert!(!profile.matches("ann"));
    }

    #[test]
    fn test_message_sender() {
        let msg = Message::with_timestamp("u1", "hello", 42);
        assert!(msg.is_from("u1"));
        assert!(!msg.is_from("u2"));
        assert_eq!(msg.timestamp, 42);
    }
}
