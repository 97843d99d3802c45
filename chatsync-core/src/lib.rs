//! chatsync core
//!
//! Backend-agnostic core of a two-party chat client. The hosted backend
//! (authentication, document store, realtime listeners) is reached only
//! through the traits in [`store`]; everything here is wiring and derived
//! state built on top of those traits.
//!
//! The central piece is the [`ChatPreviewAggregator`], which turns a live
//! stream of chat records into a sorted list of previews enriched with the
//! counterpart's display name.

pub mod aggregator;
pub mod auth;
pub mod directory;
pub mod format;
pub mod memory;
pub mod models;
pub mod store;
pub mod subscription;
pub mod thread;
pub mod validate;

mod error;
pub use aggregator::{
    build_previews, counterpart_of, ChatPreviewAggregator, PreviewConfig, PreviewState,
    PreviewSubscription,
};
pub use auth::{AuthSession, AuthStatus};
pub use directory::{chat_key, UserDirectory};
pub use error::{ChatError, Result};
pub use memory::MemoryBackend;
pub use models::{current_timestamp, ChatPreview, ChatRecord, Message, UserProfile};
pub use store::{AuthProvider, ChatStore, MessageStore, ProfileStore};
pub use subscription::Subscription;
pub use thread::{MessageSubscription, MessageThread};

/// Name shown for a counterpart whose profile has no usable username
pub const DEFAULT_PLACEHOLDER_NAME: &str = "User";
