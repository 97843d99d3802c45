//! User Directory
//!
//! Finding other users and opening a chat with them.
//!
//! A chat between two users is identified by its *chat key*: the two user
//! IDs sorted and joined with `_`, so both participants derive the same key.

use crate::models::{current_timestamp, UserProfile};
use crate::store::{AuthProvider, ChatStore, ProfileStore};
use crate::{ChatError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key shared by the chat between `a` and `b`, independent of argument order
pub fn chat_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// User search and chat creation
pub struct UserDirectory {
    profiles: Arc<dyn ProfileStore>,
    chats: Arc<dyn ChatStore>,
}

impl UserDirectory {
    /// Create over the given stores
    pub fn new(profiles: Arc<dyn ProfileStore>, chats: Arc<dyn ChatStore>) -> Self {
        Self { profiles, chats }
    }

    /// Users whose username or email contains `query`, ignoring case
    ///
    /// `exclude_uid` (normally the signed-in user) is never returned. A blank
    /// query or a store failure yields no results.
    pub async fn search_users(&self, query: &str, exclude_uid: Option<&str>) -> Vec<UserProfile> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let profiles = match self.profiles.list_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!("User search for '{}' failed: {}", query, e);
                return Vec::new();
            }
        };

        let results: Vec<UserProfile> = profiles
            .into_iter()
            .filter(|profile| profile.matches(query))
            .filter(|profile| Some(profile.uid.as_str()) != exclude_uid)
            .collect();

        debug!("User search for '{}' matched {} users", query, results.len());
        results
    }

    /// Profile with exactly this username
    pub async fn find_user(&self, username: &str) -> Result<Option<UserProfile>> {
        self.profiles.find_by_username(username.trim()).await
    }

    /// ID of the chat between `current_uid` and `other_uid`, creating it if needed
    pub async fn get_or_create_chat(&self, current_uid: &str, other_uid: &str) -> Result<String> {
        if current_uid == other_uid {
            return Err(ChatError::invalid_input("Cannot start a chat with yourself"));
        }

        let key = chat_key(current_uid, other_uid);
        if let Some(existing) = self.chats.find_chat_by_key(&key).await? {
            debug!("Found existing chat {} for key {}", existing.id, key);
            return Ok(existing.id);
        }

        let chat_id = self
            .chats
            .create_chat(
                vec![current_uid.to_string(), other_uid.to_string()],
                key,
                current_timestamp(),
            )
            .await?;

        info!("Created chat {} between {} and {}", chat_id, current_uid, other_uid);
        Ok(chat_id)
    }

    /// Profile of whoever is signed in to `auth`
    pub async fn current_profile(&self, auth: &dyn AuthProvider) -> Result<UserProfile> {
        let uid = auth.current_user().ok_or(ChatError::NotSignedIn)?;
        self.profiles
            .get_user_profile(&uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Profile {}", uid)))
    }
}
