//! Chat Preview Aggregator
//!
//! Keeps a live, sorted list of [`ChatPreview`]s for one user by joining the
//! backend's chat snapshots with the counterpart profiles.
//!
//! ## Snapshot Processing
//!
//! 1. **Subscribe**: open the live query for chats containing the user
//! 2. **Resolve**: for each snapshot, look up every distinct counterpart
//!    concurrently, each lookup bounded by `lookup_timeout`
//! 3. **Publish**: join, dedupe, sort, and publish the whole list at once
//!
//! A snapshot is a full replacement. If the next snapshot arrives while
//! lookups for the previous one are still running, those lookups are dropped
//! and their results never reach the output.
//!
//! ## Ordering
//!
//! Previews are ordered by last activity, most recent first. Equal
//! timestamps are ordered by chat ID so the output is deterministic.
//!
//! ## Failures
//!
//! - Subscription error: [`PreviewState::Unavailable`], which shows no chats
//! - Lookup error or timeout: that chat is left out of this snapshot
//!   (or shown with the placeholder name when `fallback_on_error` is set)
//! - Record without a distinguishable counterpart: skipped
//!
//! ## Example
//!
//! ```rust,ignore
//! let aggregator = ChatPreviewAggregator::new(chats, profiles, PreviewConfig::default());
//! let mut previews = aggregator.observe_chat_previews("u1");
//!
//! let state = previews.wait_for(|s| s.is_settled()).await;
//! for preview in state.unwrap().previews() {
//!     println!("{}: {}", preview.other_username, preview.last_message);
//! }
//! ```

use crate::models::{ChatPreview, ChatRecord, UserProfile};
use crate::auth::AuthSession;
use crate::store::{AuthProvider, ChatStore, ProfileStore};
use crate::subscription::Subscription;
use crate::{ChatError, DEFAULT_PLACEHOLDER_NAME};
use futures::future::join_all;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Default bound on a single profile lookup
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5_000;

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Bound on a single profile lookup, in milliseconds
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Name used when a counterpart has no profile or an empty username
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,

    /// Show failed lookups with the placeholder name instead of dropping them
    #[serde(default)]
    pub fallback_on_error: bool,

    /// Reuse profiles across snapshots instead of fetching them every time
    #[serde(default)]
    pub cache_profiles: bool,
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

fn default_placeholder_name() -> String {
    DEFAULT_PLACEHOLDER_NAME.to_string()
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
            placeholder_name: default_placeholder_name(),
            fallback_on_error: false,
            cache_profiles: false,
        }
    }
}

impl PreviewConfig {
    /// Lookup timeout as a `Duration`
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Published state of a preview subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    /// Nothing published yet
    Pending,
    /// Previews for the latest snapshot
    Ready(Vec<ChatPreview>),
    /// The backend subscription failed; shows as an empty list
    Unavailable(String),
}

impl PreviewState {
    /// Previews to render (empty unless `Ready`)
    pub fn previews(&self) -> &[ChatPreview] {
        match self {
            PreviewState::Ready(previews) => previews,
            PreviewState::Pending | PreviewState::Unavailable(_) => &[],
        }
    }

    /// Whether at least one snapshot (or error) has been processed
    pub fn is_settled(&self) -> bool {
        !matches!(self, PreviewState::Pending)
    }

    /// Error message of an `Unavailable` state
    pub fn error(&self) -> Option<&str> {
        match self {
            PreviewState::Unavailable(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Live chat list for one user
pub type PreviewSubscription = Subscription<PreviewState>;

impl Subscription<PreviewState> {
    /// Stream of published preview lists
    ///
    /// Yields the current list first if one is already settled, then one
    /// item per publication. Ends when the subscription stops.
    pub fn into_stream(self) -> BoxStream<'static, Vec<ChatPreview>> {
        stream::unfold((self, true), |(mut sub, first)| async move {
            if first {
                let initial = sub.take_current();
                if initial.is_settled() {
                    return Some((initial.previews().to_vec(), (sub, false)));
                }
            }
            let state = sub.changed().await?;
            Some((state.previews().to_vec(), (sub, false)))
        })
        .boxed()
    }
}

/// The participant of `record` that is not `uid`
///
/// `None` when the record does not contain `uid` or does not link exactly
/// two distinct participants.
pub fn counterpart_of<'a>(record: &'a ChatRecord, uid: &str) -> Option<&'a str> {
    let [first, second] = record.users.as_slice() else {
        return None;
    };

    if first == second {
        None
    } else if first == uid {
        Some(second.as_str())
    } else if second == uid {
        Some(first.as_str())
    } else {
        None
    }
}

/// Join `records` with resolved display names into a sorted preview list
///
/// Records without a counterpart, or whose counterpart has no entry in
/// `display_names`, are left out. When a chat ID repeats, the later record
/// wins.
pub fn build_previews(
    uid: &str,
    records: &[ChatRecord],
    display_names: &HashMap<String, String>,
) -> Vec<ChatPreview> {
    let mut by_chat: HashMap<&str, ChatPreview> = HashMap::with_capacity(records.len());

    for record in records {
        let Some(other) = counterpart_of(record, uid) else {
            debug!("Skipping malformed chat {} (users: {:?})", record.id, record.users);
            continue;
        };
        let Some(name) = display_names.get(other) else {
            continue;
        };

        by_chat.insert(
            &record.id,
            ChatPreview {
                chat_id: record.id.clone(),
                other_user_id: other.to_string(),
                other_username: name.clone(),
                last_message: record.last_message.clone(),
                timestamp: record.timestamp,
            },
        );
    }

    let mut previews: Vec<ChatPreview> = by_chat.into_values().collect();
    previews.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.chat_id.cmp(&b.chat_id))
    });
    previews
}

/// Result of one profile lookup
#[derive(Debug)]
enum LookupOutcome {
    Found(UserProfile),
    Missing,
    Failed(ChatError),
}

/// Builds live chat lists from the injected chat and profile stores
#[derive(Clone)]
pub struct ChatPreviewAggregator {
    /// Chat documents
    chats: Arc<dyn ChatStore>,

    /// Profile documents
    profiles: Arc<dyn ProfileStore>,

    /// Configuration
    config: PreviewConfig,

    /// Profiles kept across snapshots (only with `cache_profiles`)
    cache: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl ChatPreviewAggregator {
    /// Create an aggregator over the given stores
    pub fn new(
        chats: Arc<dyn ChatStore>,
        profiles: Arc<dyn ProfileStore>,
        config: PreviewConfig,
    ) -> Self {
        info!(
            "Creating chat preview aggregator with lookup_timeout={}ms, cache_profiles={}",
            config.lookup_timeout_ms, config.cache_profiles
        );

        Self {
            chats,
            profiles,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Follow the chat list of `uid`
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// subscription cancels the live query and any lookups in flight.
    pub fn observe_chat_previews(&self, uid: &str) -> PreviewSubscription {
        let worker = self.worker(uid);

        debug!("Observing chat previews for {}", uid);
        Subscription::spawn(PreviewState::Pending, move |state_tx| async move {
            worker.run(&state_tx).await
        })
    }

    /// Chat list of whoever is signed in to `auth` right now
    ///
    /// The user is read once. With nobody signed in the result is an empty
    /// list and no backend subscription is opened. Use
    /// [`observe_session`](Self::observe_session) to follow later sign-ins
    /// and sign-outs.
    pub fn observe_current_user(&self, auth: &dyn AuthProvider) -> PreviewSubscription {
        match auth.current_user() {
            Some(uid) => self.observe_chat_previews(&uid),
            None => {
                debug!("No signed-in user; chat list stays empty");
                Subscription::fixed(PreviewState::Ready(Vec::new()))
            }
        }
    }

    /// Chat list that follows whoever is signed in through `session`
    ///
    /// Signing out publishes an empty list and drops the previous user's
    /// live query and lookups. Signing in again starts over with `Pending`
    /// and the new user's chats.
    pub fn observe_session(&self, session: &AuthSession) -> PreviewSubscription {
        let aggregator = self.clone();
        let users = session.watch_user();

        Subscription::spawn(PreviewState::Pending, move |state_tx| async move {
            aggregator.follow_users(users, &state_tx).await
        })
    }

    async fn follow_users(
        self,
        mut users: watch::Receiver<Option<String>>,
        state_tx: &watch::Sender<PreviewState>,
    ) {
        loop {
            let current = users.borrow_and_update().clone();
            let Some(uid) = current else {
                debug!("No signed-in user; chat list is empty");
                state_tx.send_replace(PreviewState::Ready(Vec::new()));
                if users.changed().await.is_err() {
                    break;
                }
                continue;
            };

            debug!("Following chat list of signed-in user {}", uid);
            state_tx.send_replace(PreviewState::Pending);
            let run = self.worker(&uid).run(state_tx);
            tokio::pin!(run);

            tokio::select! {
                _ = &mut run => {
                    if users.changed().await.is_err() {
                        break;
                    }
                }
                changed = users.changed() => {
                    if changed.is_err() {
                        // Session gone; keep following the last user
                        run.await;
                        break;
                    }
                    debug!("Signed-in user changed, dropping chat list of {}", uid);
                }
            }
        }
    }

    fn worker(&self, uid: &str) -> SnapshotWorker {
        SnapshotWorker {
            uid: uid.to_string(),
            chats: self.chats.clone(),
            profiles: self.profiles.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
        }
    }
}

/// Background task state for one subscription
struct SnapshotWorker {
    uid: String,
    chats: Arc<dyn ChatStore>,
    profiles: Arc<dyn ProfileStore>,
    config: PreviewConfig,
    cache: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl SnapshotWorker {
    async fn run(self, state_tx: &watch::Sender<PreviewState>) {
        let mut snapshots = match self.chats.subscribe_chats_for_user(&self.uid).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to subscribe to chats for {}: {}", self.uid, e);
                state_tx.send_replace(PreviewState::Unavailable(e.to_string()));
                return;
            }
        };

        let mut next = snapshots.next().await;
        let mut stream_done = false;
        loop {
            let records = match next.take() {
                None => {
                    debug!("Chat subscription for {} ended", self.uid);
                    break;
                }
                Some(Err(e)) => {
                    warn!("Chat subscription error for {}: {}", self.uid, e);
                    state_tx.send_replace(PreviewState::Unavailable(e.to_string()));
                    next = snapshots.next().await;
                    continue;
                }
                Some(Ok(records)) => records,
            };

            // Only a newer snapshot or an error supersedes these lookups. Once
            // the stream has ended the last snapshot still gets published.
            let resolve = self.resolve_snapshot(&records);
            tokio::pin!(resolve);
            loop {
                tokio::select! {
                    previews = &mut resolve => {
                        debug!(
                            "Publishing {} chat previews for {}",
                            previews.len(),
                            self.uid
                        );
                        state_tx.send_replace(PreviewState::Ready(previews));
                        if !stream_done {
                            next = snapshots.next().await;
                        }
                        break;
                    }
                    superseding = snapshots.next(), if !stream_done => match superseding {
                        None => {
                            debug!(
                                "Chat subscription for {} ended, finishing last snapshot",
                                self.uid
                            );
                            stream_done = true;
                        }
                        Some(item) => {
                            debug!(
                                "Snapshot for {} superseded before its lookups finished",
                                self.uid
                            );
                            next = Some(item);
                            break;
                        }
                    },
                }
            }
        }
    }

    /// Look up every distinct counterpart of `records` and build the list
    async fn resolve_snapshot(&self, records: &[ChatRecord]) -> Vec<ChatPreview> {
        let counterparts: BTreeSet<&str> = records
            .iter()
            .filter_map(|record| counterpart_of(record, &self.uid))
            .collect();

        debug!(
            "Resolving {} counterparts for {} chats",
            counterparts.len(),
            records.len()
        );

        let lookups = counterparts.into_iter().map(|other| async move {
            let outcome = self.lookup(other).await;
            (other, outcome)
        });

        let mut display_names = HashMap::new();
        for (other, outcome) in join_all(lookups).await {
            if let Some(name) = self.display_name(other, outcome) {
                display_names.insert(other.to_string(), name);
            }
        }

        build_previews(&self.uid, records, &display_names)
    }

    async fn lookup(&self, uid: &str) -> LookupOutcome {
        if self.config.cache_profiles {
            if let Some(profile) = self.cache.read().await.get(uid) {
                return LookupOutcome::Found(profile.clone());
            }
        }

        let timeout = self.config.lookup_timeout();
        match tokio::time::timeout(timeout, self.profiles.get_user_profile(uid)).await {
            Ok(Ok(Some(profile))) => {
                if self.config.cache_profiles {
                    self.cache
                        .write()
                        .await
                        .insert(uid.to_string(), profile.clone());
                }
                LookupOutcome::Found(profile)
            }
            Ok(Ok(None)) => LookupOutcome::Missing,
            Ok(Err(e)) => LookupOutcome::Failed(e),
            Err(_) => LookupOutcome::Failed(ChatError::Timeout(format!(
                "profile lookup for {} after {:?}",
                uid, timeout
            ))),
        }
    }

    fn display_name(&self, uid: &str, outcome: LookupOutcome) -> Option<String> {
        match outcome {
            LookupOutcome::Found(profile) if !profile.username.is_empty() => Some(profile.username),
            LookupOutcome::Found(_) | LookupOutcome::Missing => {
                debug!("No username for {}, using placeholder", uid);
                Some(self.config.placeholder_name.clone())
            }
            LookupOutcome::Failed(e) => {
                warn!("Profile lookup for {} failed: {}", uid, e);
                self.config
                    .fallback_on_error
                    .then(|| self.config.placeholder_name.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(uid, name)| (uid.to_string(), name.to_string()))
            .collect()
    }

    #[test]
    fn test_counterpart_of() {
        let record = ChatRecord::new("c1", "u1", "u2", "", 0);
        assert_eq!(counterpart_of(&record, "u1"), Some("u2"));
        assert_eq!(counterpart_of(&record, "u2"), Some("u1"));
        assert_eq!(counterpart_of(&record, "u3"), None);
    }

    #[test]
    fn test_counterpart_of_malformed() {
        let mut record = ChatRecord::new("c1", "u1", "u1", "", 0);
        assert_eq!(counterpart_of(&record, "u1"), None);

        record.users = vec!["u1".into()];
        assert_eq!(counterpart_of(&record, "u1"), None);

        record.users = vec!["u1".into(), "u2".into(), "u3".into()];
        assert_eq!(counterpart_of(&record, "u1"), None);

        record.users.clear();
        assert_eq!(counterpart_of(&record, "u1"), None);
    }

    #[test]
    fn test_build_previews_example() {
        let records = vec![
            ChatRecord::new("c1", "u1", "u2", "hi", 100),
            ChatRecord::new("c2", "u1", "u3", "yo", 200),
        ];
        let previews = build_previews("u1", &records, &names(&[("u2", "bob"), ("u3", "ann")]));

        assert_eq!(
            previews,
            vec![
                ChatPreview {
                    chat_id: "c2".into(),
                    other_user_id: "u3".into(),
                    other_username: "ann".into(),
                    last_message: "yo".into(),
                    timestamp: 200,
                },
                ChatPreview {
                    chat_id: "c1".into(),
                    other_user_id: "u2".into(),
                    other_username: "bob".into(),
                    last_message: "hi".into(),
                    timestamp: 100,
                },
            ]
        );
    }

    #[test]
    fn test_build_previews_tie_break_by_chat_id() {
        let records = vec![
            ChatRecord::new("cb", "u1", "u2", "", 50),
            ChatRecord::new("ca", "u1", "u3", "", 50),
        ];
        let previews = build_previews("u1", &records, &names(&[("u2", "bob"), ("u3", "ann")]));

        let ids: Vec<&str> = previews.iter().map(|p| p.chat_id.as_str()).collect();
        assert_eq!(ids, vec!["ca", "cb"]);
    }

    #[test]
    fn test_build_previews_duplicate_chat_id_last_wins() {
        let records = vec![
            ChatRecord::new("c1", "u1", "u2", "old", 10),
            ChatRecord::new("c1", "u1", "u2", "new", 20),
        ];
        let previews = build_previews("u1", &records, &names(&[("u2", "bob")]));

        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].last_message, "new");
    }

    #[test]
    fn test_build_previews_skips_unresolved_and_malformed() {
        let records = vec![
            ChatRecord::new("c1", "u1", "u2", "", 10),
            ChatRecord::new("c2", "u1", "u3", "", 20),
            ChatRecord::new("c3", "u4", "u5", "", 30),
        ];
        let previews = build_previews("u1", &records, &names(&[("u2", "bob")]));

        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].chat_id, "c1");
    }

    #[test]
    fn test_build_previews_two_chats_same_counterpart() {
        let records = vec![
            ChatRecord::new("c1", "u1", "u2", "a", 10),
            ChatRecord::new("c2", "u2", "u1", "b", 20),
        ];
        let previews = build_previews("u1", &records, &names(&[("u2", "bob")]));

        assert_eq!(previews.len(), 2);
        assert!(previews.iter().all(|p| p.other_username == "bob"));
    }

    #[test]
    fn test_preview_state_accessors() {
        assert!(!PreviewState::Pending.is_settled());
        assert!(PreviewState::Pending.previews().is_empty());

        let failed = PreviewState::Unavailable("offline".into());
        assert!(failed.is_settled());
        assert!(failed.previews().is_empty());
        assert_eq!(failed.error(), Some("offline"));

        let ready = PreviewState::Ready(Vec::new());
        assert!(ready.is_settled());
        assert_eq!(ready.error(), None);
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: PreviewConfig = serde_json::from_str(r#"{"fallback_on_error": true}"#).unwrap();
        assert_eq!(config.lookup_timeout(), Duration::from_secs(5));
        assert_eq!(config.placeholder_name, "User");
        assert!(config.fallback_on_error);
        assert!(!config.cache_profiles);
    }
}
