//! Backend Interfaces
//!
//! The hosted backend is split into four narrow traits. Components receive
//! them as `Arc<dyn Trait>` through their constructors; nothing in this
//! crate reaches for a global backend handle.
//!
//! Live queries are modelled as streams of full snapshots: every item is the
//! complete result set at one point in time, or an error. Dropping the
//! stream cancels the underlying listener.

use crate::models::{ChatRecord, Message, UserProfile};
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Live stream of chat snapshots for one user
pub type ChatSnapshotStream = BoxStream<'static, Result<Vec<ChatRecord>>>;

/// Live stream of message snapshots for one chat
pub type MessageSnapshotStream = BoxStream<'static, Result<Vec<Message>>>;

/// Chat documents
///
/// ## Snapshot Semantics
///
/// `subscribe_chats_for_user` must deliver the current result set as its
/// first item and a new full result set after every change. Ordering within
/// a snapshot is unspecified.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Subscribe to every chat whose participants contain `uid`
    async fn subscribe_chats_for_user(&self, uid: &str) -> Result<ChatSnapshotStream>;

    /// Find the chat with the given participant key
    async fn find_chat_by_key(&self, chat_key: &str) -> Result<Option<ChatRecord>>;

    /// Fetch one chat by ID
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;

    /// Create a chat with an empty last message and return its ID
    async fn create_chat(&self, users: Vec<String>, chat_key: String, timestamp: i64)
        -> Result<String>;

    /// Record the latest activity of a chat
    async fn update_last_message(&self, chat_id: &str, text: &str, timestamp: i64) -> Result<()>;
}

/// User profile documents
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch one profile; `Ok(None)` when no such user exists
    async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>>;

    /// Fetch every profile
    async fn list_profiles(&self) -> Result<Vec<UserProfile>>;

    /// Find the profile with exactly this username
    async fn find_by_username(&self, username: &str) -> Result<Option<UserProfile>>;

    /// Create or replace a profile
    async fn put_profile(&self, profile: UserProfile) -> Result<()>;
}

/// Message sub-collections, one per chat
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Subscribe to every message of a chat
    async fn subscribe_messages(&self, chat_id: &str) -> Result<MessageSnapshotStream>;

    /// Append a message to a chat
    async fn add_message(&self, chat_id: &str, message: Message) -> Result<()>;
}

/// Email/password authentication
///
/// The provider owns the notion of "current user". `create_user` signs the
/// new account in, as hosted providers do.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// UID of the signed-in user, if any
    fn current_user(&self) -> Option<String>;

    /// Sign in and return the user's UID
    async fn sign_in(&self, email: &str, password: &str) -> Result<String>;

    /// Create an account, sign it in, and return its UID
    async fn create_user(&self, email: &str, password: &str) -> Result<String>;

    /// Sign out the current user
    async fn sign_out(&self);
}
