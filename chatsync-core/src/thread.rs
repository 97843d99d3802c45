//! Message Threads
//!
//! Live view of the messages in one chat, plus sending. Sending also records
//! the chat's latest activity so the chat list picks it up.

use crate::models::{current_timestamp, Message};
use crate::store::{AuthProvider, ChatStore, MessageStore};
use crate::subscription::Subscription;
use crate::{ChatError, Result};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live list of a chat's messages, oldest first
pub type MessageSubscription = Subscription<Vec<Message>>;

/// Message operations for the signed-in user
pub struct MessageThread {
    messages: Arc<dyn MessageStore>,
    chats: Arc<dyn ChatStore>,
    auth: Arc<dyn AuthProvider>,
}

impl MessageThread {
    /// Create over the given stores
    pub fn new(
        messages: Arc<dyn MessageStore>,
        chats: Arc<dyn ChatStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            messages,
            chats,
            auth,
        }
    }

    /// Follow the messages of `chat_id`, ordered by timestamp ascending
    ///
    /// A failed subscription shows as an empty thread.
    pub fn observe_messages(&self, chat_id: &str) -> MessageSubscription {
        let messages = self.messages.clone();
        let chat_id = chat_id.to_string();

        Subscription::spawn(Vec::new(), move |state_tx| async move {
            let mut snapshots = match messages.subscribe_messages(&chat_id).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to subscribe to messages of {}: {}", chat_id, e);
                    state_tx.send_replace(Vec::new());
                    return;
                }
            };

            while let Some(snapshot) = snapshots.next().await {
                match snapshot {
                    Ok(mut thread) => {
                        thread.sort_by_key(|msg| msg.timestamp);
                        debug!("Chat {} has {} messages", chat_id, thread.len());
                        state_tx.send_replace(thread);
                    }
                    Err(e) => {
                        warn!("Message subscription error for {}: {}", chat_id, e);
                        state_tx.send_replace(Vec::new());
                    }
                }
            }
        })
    }

    /// Send `text` to `chat_id` as the signed-in user
    ///
    /// Surrounding whitespace is trimmed; blank messages are rejected. Nothing
    /// is written unless the chat exists and the sender takes part in it.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message> {
        let sender = self.auth.current_user().ok_or(ChatError::NotSignedIn)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::invalid_input("Message is empty"));
        }

        let chat = self
            .chats
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {}", chat_id)))?;
        if !chat.involves(&sender) {
            return Err(ChatError::invalid_input("You are not part of this chat"));
        }

        let message = Message::with_timestamp(sender, text, current_timestamp());
        self.messages.add_message(chat_id, message.clone()).await?;
        self.chats
            .update_last_message(chat_id, text, message.timestamp)
            .await?;

        info!("Sent message to chat {} ({} chars)", chat_id, text.len());
        Ok(message)
    }
}
