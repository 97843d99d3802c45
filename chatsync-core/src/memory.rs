//! In-Memory Backend
//!
//! A process-local implementation of every backend trait, used by the CLI
//! and by tests. Every mutation bumps a revision counter published through a
//! `watch` channel; live subscriptions recompute their query on each bump and
//! deliver the full result set, matching the snapshot semantics of a hosted
//! realtime store.
//!
//! ## Persistence
//!
//! The documents can be saved to and loaded from a JSON data file. The
//! signed-in user is process state and is not persisted.
//!
//! ## Failure Injection
//!
//! Tests can make individual profile lookups fail or stall, and can push an
//! error into every live chat or message subscription.

use crate::models::{ChatRecord, Message, UserProfile};
use crate::store::{
    AuthProvider, ChatSnapshotStream, ChatStore, MessageSnapshotStream, MessageStore, ProfileStore,
};
use crate::{ChatError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Credentials of one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// User ID
    pub uid: String,

    /// Hex SHA-256 of `email:password`
    pub password_hash: String,
}

/// Every document held by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryData {
    /// Profiles by UID
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,

    /// Accounts by lowercase email
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,

    /// Chats by ID
    #[serde(default)]
    pub chats: BTreeMap<String, ChatRecord>,

    /// Messages by chat ID, in insertion order
    #[serde(default)]
    pub messages: BTreeMap<String, Vec<Message>>,
}

/// Injected failures
#[derive(Debug, Default)]
struct Faults {
    chat_subscription: Option<String>,
    message_subscription: Option<String>,
    profile_listing: Option<String>,
    failing_profiles: HashSet<String>,
    profile_delays: HashMap<String, Duration>,
}

struct Shared {
    data: RwLock<MemoryData>,
    faults: RwLock<Faults>,
    current_user: RwLock<Option<String>>,
    revision: watch::Sender<u64>,
    profile_lookups: AtomicUsize,
}

impl Shared {
    fn data(&self) -> Result<RwLockReadGuard<'_, MemoryData>> {
        self.data
            .read()
            .map_err(|e| ChatError::backend(format!("data lock poisoned: {}", e)))
    }

    fn data_mut(&self) -> Result<RwLockWriteGuard<'_, MemoryData>> {
        self.data
            .write()
            .map_err(|e| ChatError::backend(format!("data lock poisoned: {}", e)))
    }

    fn faults(&self) -> Result<RwLockReadGuard<'_, Faults>> {
        self.faults
            .read()
            .map_err(|e| ChatError::backend(format!("fault lock poisoned: {}", e)))
    }

    fn faults_mut(&self) -> Result<RwLockWriteGuard<'_, Faults>> {
        self.faults
            .write()
            .map_err(|e| ChatError::backend(format!("fault lock poisoned: {}", e)))
    }

    /// Wake every live subscription
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn chats_for(&self, uid: &str) -> Result<Vec<ChatRecord>> {
        if let Some(msg) = &self.faults()?.chat_subscription {
            return Err(ChatError::backend(msg.clone()));
        }

        Ok(self
            .data()?
            .chats
            .values()
            .filter(|chat| chat.involves(uid))
            .cloned()
            .collect())
    }

    fn messages_for(&self, chat_id: &str) -> Result<Vec<Message>> {
        if let Some(msg) = &self.faults()?.message_subscription {
            return Err(ChatError::backend(msg.clone()));
        }

        Ok(self
            .data()?
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Live stream re-running `query` on every revision bump
fn live_query<T, F>(shared: Arc<Shared>, query: F) -> stream::BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: Fn(&Shared) -> Result<T> + Send + Sync + 'static,
{
    let revision_rx = shared.revision.subscribe();

    stream::unfold(
        (shared, revision_rx, query, true),
        |(shared, mut revision_rx, query, first)| async move {
            if !first {
                revision_rx.changed().await.ok()?;
            }
            let snapshot = query(&*shared);
            Some((snapshot, (shared, revision_rx, query, false)))
        },
    )
    .boxed()
}

fn hash_password(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Process-local backend implementing every store trait
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::with_data(MemoryData::default())
    }

    /// Create a backend holding `data`
    pub fn with_data(data: MemoryData) -> Self {
        let (revision, _) = watch::channel(0);

        Self {
            shared: Arc::new(Shared {
                data: RwLock::new(data),
                faults: RwLock::new(Faults::default()),
                current_user: RwLock::new(None),
                revision,
                profile_lookups: AtomicUsize::new(0),
            }),
        }
    }

    /// Load documents from a JSON data file; a missing file yields an empty backend
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No data file at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let contents = fs::read_to_string(path)?;
        let data: MemoryData = serde_json::from_str(&contents)?;
        info!(
            "Loaded {} users and {} chats from {:?}",
            data.users.len(),
            data.chats.len(),
            path
        );
        Ok(Self::with_data(data))
    }

    /// Save documents to a JSON data file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*self.shared.data()?)?;
        fs::write(path, contents)?;
        debug!("Saved data file {:?}", path);
        Ok(())
    }

    /// Replace every document with the contents of `path`
    ///
    /// Live subscriptions see the new data as a fresh snapshot. The signed-in
    /// user and injected faults are kept.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let data: MemoryData = serde_json::from_str(&contents)?;
        *self.shared.data_mut()? = data;
        self.shared.bump();
        debug!("Reloaded data file {:?}", path);
        Ok(())
    }

    /// Copy of every document
    pub fn snapshot(&self) -> Result<MemoryData> {
        Ok(self.shared.data()?.clone())
    }

    /// Insert a chat record as-is, without any validation
    pub fn insert_chat(&self, record: ChatRecord) -> Result<()> {
        self.shared
            .data_mut()?
            .chats
            .insert(record.id.clone(), record);
        self.shared.bump();
        Ok(())
    }

    /// Delete a chat record
    pub fn remove_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let removed = self.shared.data_mut()?.chats.remove(chat_id);
        self.shared.bump();
        Ok(removed)
    }

    /// Insert a profile without creating an account
    pub fn insert_profile(&self, profile: UserProfile) -> Result<()> {
        self.shared
            .data_mut()?
            .users
            .insert(profile.uid.clone(), profile);
        self.shared.bump();
        Ok(())
    }

    /// Re-deliver the current result set to every live subscription
    pub fn redeliver(&self) {
        self.shared.bump();
    }

    /// Number of `get_user_profile` calls served so far
    pub fn profile_lookups(&self) -> usize {
        self.shared.profile_lookups.load(Ordering::SeqCst)
    }

    /// Make lookups of `uid` fail (or succeed again)
    pub fn set_profile_failure(&self, uid: &str, failing: bool) -> Result<()> {
        let mut faults = self.shared.faults_mut()?;
        if failing {
            faults.failing_profiles.insert(uid.to_string());
        } else {
            faults.failing_profiles.remove(uid);
        }
        Ok(())
    }

    /// Delay every lookup of `uid` by `delay`
    pub fn set_profile_delay(&self, uid: &str, delay: Option<Duration>) -> Result<()> {
        let mut faults = self.shared.faults_mut()?;
        match delay {
            Some(delay) => faults.profile_delays.insert(uid.to_string(), delay),
            None => faults.profile_delays.remove(uid),
        };
        Ok(())
    }

    /// Push `error` into every live chat subscription (`None` to recover)
    pub fn set_chat_subscription_error(&self, error: Option<&str>) -> Result<()> {
        self.shared.faults_mut()?.chat_subscription = error.map(str::to_string);
        self.shared.bump();
        Ok(())
    }

    /// Push `error` into every live message subscription (`None` to recover)
    pub fn set_message_subscription_error(&self, error: Option<&str>) -> Result<()> {
        self.shared.faults_mut()?.message_subscription = error.map(str::to_string);
        self.shared.bump();
        Ok(())
    }

    /// Make `list_profiles` fail (`None` to recover)
    pub fn set_profile_listing_error(&self, error: Option<&str>) -> Result<()> {
        self.shared.faults_mut()?.profile_listing = error.map(str::to_string);
        Ok(())
    }

    fn set_current_user(&self, uid: Option<String>) -> Result<()> {
        let mut current = self
            .shared
            .current_user
            .write()
            .map_err(|e| ChatError::backend(format!("session lock poisoned: {}", e)))?;
        *current = uid;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryBackend {
    async fn subscribe_chats_for_user(&self, uid: &str) -> Result<ChatSnapshotStream> {
        debug!("Opening live chat query for {}", uid);
        let uid = uid.to_string();
        Ok(live_query(self.shared.clone(), move |shared| {
            shared.chats_for(&uid)
        }))
    }

    async fn find_chat_by_key(&self, chat_key: &str) -> Result<Option<ChatRecord>> {
        Ok(self
            .shared
            .data()?
            .chats
            .values()
            .find(|chat| chat.chat_key == chat_key)
            .cloned())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.shared.data()?.chats.get(chat_id).cloned())
    }

    async fn create_chat(
        &self,
        users: Vec<String>,
        chat_key: String,
        timestamp: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let record = ChatRecord {
            id: id.clone(),
            users,
            chat_key,
            last_message: String::new(),
            timestamp,
        };

        self.shared.data_mut()?.chats.insert(id.clone(), record);
        self.shared.bump();
        Ok(id)
    }

    async fn update_last_message(&self, chat_id: &str, text: &str, timestamp: i64) -> Result<()> {
        {
            let mut data = self.shared.data_mut()?;
            let chat = data
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| ChatError::NotFound(format!("Chat {}", chat_id)))?;
            chat.last_message = text.to_string();
            chat.timestamp = timestamp;
        }
        self.shared.bump();
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryBackend {
    async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.shared.profile_lookups.fetch_add(1, Ordering::SeqCst);

        let (failing, delay) = {
            let faults = self.shared.faults()?;
            (
                faults.failing_profiles.contains(uid),
                faults.profile_delays.get(uid).copied(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            warn!("Injected lookup failure for {}", uid);
            return Err(ChatError::backend(format!("lookup of {} failed", uid)));
        }

        Ok(self.shared.data()?.users.get(uid).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        if let Some(msg) = &self.shared.faults()?.profile_listing {
            return Err(ChatError::backend(msg.clone()));
        }
        Ok(self.shared.data()?.users.values().cloned().collect())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .shared
            .data()?
            .users
            .values()
            .find(|profile| profile.username == username)
            .cloned())
    }

    async fn put_profile(&self, profile: UserProfile) -> Result<()> {
        self.insert_profile(profile)
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn subscribe_messages(&self, chat_id: &str) -> Result<MessageSnapshotStream> {
        debug!("Opening live message query for {}", chat_id);
        let chat_id = chat_id.to_string();
        Ok(live_query(self.shared.clone(), move |shared| {
            shared.messages_for(&chat_id)
        }))
    }

    async fn add_message(&self, chat_id: &str, message: Message) -> Result<()> {
        self.shared
            .data_mut()?
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .push(message);
        self.shared.bump();
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    fn current_user(&self) -> Option<String> {
        self.shared
            .current_user
            .read()
            .ok()
            .and_then(|current| current.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        let email = email.trim().to_lowercase();
        let uid = {
            let data = self.shared.data()?;
            let account = data
                .accounts
                .get(&email)
                .ok_or(ChatError::InvalidCredentials)?;
            if account.password_hash != hash_password(&email, password) {
                return Err(ChatError::InvalidCredentials);
            }
            account.uid.clone()
        };

        self.set_current_user(Some(uid.clone()))?;
        info!("Signed in {}", uid);
        Ok(uid)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<String> {
        let email = email.trim().to_lowercase();
        let uid = {
            let mut data = self.shared.data_mut()?;
            if data.accounts.contains_key(&email) {
                return Err(ChatError::EmailTaken);
            }

            let uid = Uuid::new_v4().simple().to_string();
            data.accounts.insert(
                email.clone(),
                Account {
                    uid: uid.clone(),
                    password_hash: hash_password(&email, password),
                },
            );
            uid
        };

        self.set_current_user(Some(uid.clone()))?;
        info!("Created account {}", uid);
        Ok(uid)
    }

    async fn sign_out(&self) {
        if let Err(e) = self.set_current_user(None) {
            warn!("Failed to sign out: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_chat_subscription_delivers_current_then_changes() {
        let backend = MemoryBackend::new();
        backend
            .insert_chat(ChatRecord::new("c1", "u1", "u2", "hi", 1))
            .unwrap();

        let mut stream = backend.subscribe_chats_for_user("u1").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        backend
            .insert_chat(ChatRecord::new("c2", "u3", "u1", "yo", 2))
            .unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_subscription_filters_by_participant() {
        let backend = MemoryBackend::new();
        backend
            .insert_chat(ChatRecord::new("c1", "u1", "u2", "", 1))
            .unwrap();
        backend
            .insert_chat(ChatRecord::new("c2", "u2", "u3", "", 2))
            .unwrap();

        let mut stream = backend.subscribe_chats_for_user("u3").await.unwrap();
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "c2");
    }

    #[tokio::test]
    async fn test_chat_subscription_error_and_recovery() {
        let backend = MemoryBackend::new();
        let mut stream = backend.subscribe_chats_for_user("u1").await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        backend.set_chat_subscription_error(Some("offline")).unwrap();
        assert!(stream.next().await.unwrap().is_err());

        backend.set_chat_subscription_error(None).unwrap();
        assert!(stream.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_profile_lookup_counts_and_failures() {
        let backend = MemoryBackend::new();
        backend
            .insert_profile(UserProfile::new("u2", "bob", "bob@example.com"))
            .unwrap();

        assert!(backend.get_user_profile("u2").await.unwrap().is_some());
        assert!(backend.get_user_profile("nobody").await.unwrap().is_none());

        backend.set_profile_failure("u2", true).unwrap();
        assert!(backend.get_user_profile("u2").await.is_err());
        assert_eq!(backend.profile_lookups(), 3);
    }

    #[tokio::test]
    async fn test_accounts() {
        let backend = MemoryBackend::new();
        assert!(backend.current_user().is_none());

        let uid = backend.create_user("Ann@Example.com", "secret1").await.unwrap();
        assert_eq!(backend.current_user(), Some(uid.clone()));

        assert!(matches!(
            backend.create_user("ann@example.com", "other12").await,
            Err(ChatError::EmailTaken)
        ));

        backend.sign_out().await;
        assert!(backend.current_user().is_none());

        assert!(matches!(
            backend.sign_in("ann@example.com", "wrong!!").await,
            Err(ChatError::InvalidCredentials)
        ));
        assert_eq!(
            backend.sign_in("ann@example.com", "secret1").await.unwrap(),
            uid
        );
    }

    #[tokio::test]
    async fn test_update_last_message_missing_chat() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.update_last_message("nope", "hi", 1).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("data.json");

        let backend = MemoryBackend::new();
        let uid = backend.create_user("bob@example.com", "secret1").await.unwrap();
        backend
            .insert_profile(UserProfile::new(&uid, "bob", "bob@example.com"))
            .unwrap();
        backend
            .add_message("c1", Message::with_timestamp(&uid, "hello", 5))
            .await
            .unwrap();
        backend.save(&path).unwrap();

        let loaded = MemoryBackend::load(&path).unwrap();
        assert!(loaded.current_user().is_none());
        assert_eq!(loaded.sign_in("bob@example.com", "secret1").await.unwrap(), uid);

        let data = loaded.snapshot().unwrap();
        assert_eq!(data.users[&uid].username, "bob");
        assert_eq!(data.messages["c1"].len(), 1);
    }

    #[tokio::test]
    async fn test_reload_feeds_live_subscriptions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.json");

        let reader = MemoryBackend::new();
        let mut chats = reader.subscribe_chats_for_user("u1").await.unwrap();
        assert!(chats.next().await.unwrap().unwrap().is_empty());

        let writer = MemoryBackend::new();
        writer
            .insert_chat(ChatRecord::new("c1", "u1", "u2", "hi", 1))
            .unwrap();
        writer.save(&path).unwrap();

        reader.reload(&path).unwrap();
        let snapshot = chats.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_message, "hi");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let backend = MemoryBackend::load(&temp_dir.path().join("absent.json")).unwrap();
        assert!(backend.snapshot().unwrap().chats.is_empty());
    }
}
