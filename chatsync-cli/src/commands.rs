//! Command Handlers
//!
//! Each subcommand signs in with the given credentials, performs its work
//! through the chatsync-core components, and saves the data file after any
//! mutation.

use crate::cli::{Command, Credentials};
use crate::config::Config;
use anyhow::{bail, Context, Result};
use chatsync_core::format::{format_timestamp, preview_line};
use chatsync_core::{
    AuthSession, ChatError, ChatPreviewAggregator, MemoryBackend, Message, MessageThread,
    PreviewState, ProfileStore, UserDirectory,
};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// How long one-shot commands wait for a live query to deliver
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wrap a core error, leading with the user-facing text when there is one
fn describe(error: ChatError) -> anyhow::Error {
    if error.requires_user_action() {
        let message = error.user_message();
        anyhow::Error::new(error).context(message)
    } else {
        anyhow::Error::new(error)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn render_previews(state: &PreviewState, out: &mut dyn Write) -> Result<()> {
    match state {
        PreviewState::Pending => {}
        PreviewState::Ready(previews) if previews.is_empty() => writeln!(out, "No chats yet")?,
        PreviewState::Ready(previews) => {
            for preview in previews {
                writeln!(out, "{}", preview_line(preview))?;
            }
        }
        PreviewState::Unavailable(error) => writeln!(out, "Chat list unavailable: {}", error)?,
    }
    Ok(())
}

/// Client components over one data file
pub struct App {
    config: Config,
    backend: Arc<MemoryBackend>,
    session: AuthSession,
    directory: UserDirectory,
    thread: MessageThread,
    aggregator: ChatPreviewAggregator,
}

impl App {
    /// Load the data file named in `config` and wire up the components
    pub fn open(config: Config) -> Result<Self> {
        let backend = Arc::new(
            MemoryBackend::load(&config.paths.data_file).with_context(|| {
                format!("Failed to load data file {:?}", config.paths.data_file)
            })?,
        );

        Ok(Self {
            session: AuthSession::new(backend.clone(), backend.clone()),
            directory: UserDirectory::new(backend.clone(), backend.clone()),
            thread: MessageThread::new(backend.clone(), backend.clone(), backend.clone()),
            aggregator: ChatPreviewAggregator::new(
                backend.clone(),
                backend.clone(),
                config.previews.clone(),
            ),
            backend,
            config,
        })
    }

    /// Run `command`, writing its output to `out`
    pub async fn run(&self, command: Command, out: &mut dyn Write) -> Result<()> {
        match command {
            Command::Register {
                credentials,
                username,
            } => self.register(&credentials, &username, out).await,
            Command::Whoami { credentials } => self.whoami(&credentials, out).await,
            Command::Chats { credentials } => self.chats(&credentials, out).await,
            Command::Watch {
                credentials,
                updates,
            } => self.watch(&credentials, updates, out).await,
            Command::Search { credentials, query } => self.search(&credentials, &query, out).await,
            Command::Open {
                credentials,
                username,
            } => self.open_chat(&credentials, &username, out).await,
            Command::Send {
                credentials,
                chat_id,
                text,
            } => self.send(&credentials, &chat_id, &text, out).await,
            Command::Messages {
                credentials,
                chat_id,
            } => self.messages(&credentials, &chat_id, out).await,
            Command::Config => {
                let contents =
                    toml::to_string_pretty(&self.config).context("Failed to serialize config")?;
                write!(out, "{}", contents)?;
                Ok(())
            }
        }
    }

    fn save(&self) -> Result<()> {
        let path = &self.config.paths.data_file;
        self.backend
            .save(path)
            .with_context(|| format!("Failed to save data file {:?}", path))
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<String> {
        self.session
            .login(&credentials.email, &credentials.password)
            .await
            .map_err(describe)
            .with_context(|| format!("Failed to sign in as {}", credentials.email.trim()))
    }

    /// Fail unless `chat_id` exists and `uid` takes part in it
    fn ensure_participant(&self, chat_id: &str, uid: &str) -> Result<()> {
        let data = self.backend.snapshot().map_err(describe)?;
        match data.chats.get(chat_id) {
            None => bail!("No chat with ID {}", chat_id),
            Some(chat) if !chat.involves(uid) => bail!("You are not part of chat {}", chat_id),
            Some(_) => Ok(()),
        }
    }

    async fn register(
        &self,
        credentials: &Credentials,
        username: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let uid = self
            .session
            .register(&credentials.email, &credentials.password, username)
            .await
            .map_err(describe)
            .context("Registration failed")?;
        self.save()?;

        writeln!(out, "Registered {} ({})", username.trim(), uid)?;
        Ok(())
    }

    async fn whoami(&self, credentials: &Credentials, out: &mut dyn Write) -> Result<()> {
        self.sign_in(credentials).await?;
        let profile = self
            .directory
            .current_profile(self.backend.as_ref())
            .await
            .map_err(describe)?;

        writeln!(out, "{} <{}> ({})", profile.username, profile.email, profile.uid)?;
        Ok(())
    }

    async fn chats(&self, credentials: &Credentials, out: &mut dyn Write) -> Result<()> {
        self.sign_in(credentials).await?;
        let mut previews = self.aggregator.observe_current_user(self.backend.as_ref());

        let settled = previews.wait_for(PreviewState::is_settled);
        let state = tokio::time::timeout(SETTLE_TIMEOUT, settled)
            .await
            .context("Timed out loading chats")?
            .context("Chat list subscription ended")?;

        render_previews(&state, out)
    }

    async fn watch(
        &self,
        credentials: &Credentials,
        updates: Option<usize>,
        out: &mut dyn Write,
    ) -> Result<()> {
        self.sign_in(credentials).await?;
        let previews = self.aggregator.observe_current_user(self.backend.as_ref());
        let mut state_rx = previews.watch();

        let data_file = &self.config.paths.data_file;
        let mut last_modified = modified_time(data_file);
        let mut ticker = tokio::time::interval(self.config.watch.poll_interval());
        let mut printed = 0;

        let current = state_rx.borrow_and_update().clone();
        if current.is_settled() {
            render_previews(&current, out)?;
            out.flush()?;
            printed += 1;
        }

        info!("Watching chat list (data file {:?})", data_file);
        while updates.map_or(true, |limit| printed < limit) {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        debug!("Chat list subscription ended");
                        break;
                    }
                    let state = state_rx.borrow_and_update().clone();
                    if printed > 0 {
                        writeln!(out)?;
                    }
                    render_previews(&state, out)?;
                    out.flush()?;
                    printed += 1;
                }
                _ = ticker.tick() => {
                    let modified = modified_time(data_file);
                    if modified.is_some() && modified != last_modified {
                        last_modified = modified;
                        debug!("Data file changed, reloading");
                        if let Err(e) = self.backend.reload(data_file) {
                            warn!("Failed to reload data file {:?}: {}", data_file, e);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping watch");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        credentials: &Credentials,
        query: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let uid = self.sign_in(credentials).await?;
        let users = self.directory.search_users(query, Some(&uid)).await;

        if users.is_empty() {
            writeln!(out, "No users found")?;
        }
        for user in users {
            writeln!(out, "{:<16} {}", user.username, user.email)?;
        }
        Ok(())
    }

    async fn open_chat(
        &self,
        credentials: &Credentials,
        username: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let uid = self.sign_in(credentials).await?;
        let other = self
            .directory
            .find_user(username)
            .await
            .map_err(describe)?
            .with_context(|| format!("No user named '{}'", username.trim()))?;

        let chat_id = self
            .directory
            .get_or_create_chat(&uid, &other.uid)
            .await
            .map_err(describe)?;
        self.save()?;

        writeln!(out, "{}", chat_id)?;
        Ok(())
    }

    async fn send(
        &self,
        credentials: &Credentials,
        chat_id: &str,
        text: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let uid = self.sign_in(credentials).await?;
        self.ensure_participant(chat_id, &uid)?;

        let message = self
            .thread
            .send_message(chat_id, text)
            .await
            .map_err(describe)
            .context("Failed to send message")?;
        self.save()?;

        writeln!(
            out,
            "[{}] you: {}",
            format_timestamp(message.timestamp).unwrap_or_default(),
            message.text
        )?;
        Ok(())
    }

    async fn messages(
        &self,
        credentials: &Credentials,
        chat_id: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let uid = self.sign_in(credentials).await?;
        self.ensure_participant(chat_id, &uid)?;

        let mut subscription = self.thread.observe_messages(chat_id);
        let thread = tokio::time::timeout(SETTLE_TIMEOUT, subscription.changed())
            .await
            .context("Timed out loading messages")?
            .context("Message subscription ended")?;

        if thread.is_empty() {
            writeln!(out, "No messages yet")?;
            return Ok(());
        }

        let names = self.sender_names(&thread, &uid).await;
        for message in &thread {
            let name = names.get(&message.sender).map_or("?", String::as_str);
            writeln!(
                out,
                "[{}] {}: {}",
                format_timestamp(message.timestamp).unwrap_or_default(),
                name,
                message.text
            )?;
        }
        Ok(())
    }

    /// Display name for every sender in `thread`, with `you` for `uid`
    async fn sender_names(&self, thread: &[Message], uid: &str) -> HashMap<String, String> {
        let mut names = HashMap::new();
        for message in thread {
            if names.contains_key(&message.sender) {
                continue;
            }

            let name = if message.is_from(uid) {
                "you".to_string()
            } else {
                match self.backend.get_user_profile(&message.sender).await {
                    Ok(Some(profile)) if !profile.username.is_empty() => profile.username,
                    Ok(_) => self.config.previews.placeholder_name.clone(),
                    Err(e) => {
                        warn!("Failed to look up sender {}: {}", message.sender, e);
                        self.config.previews.placeholder_name.clone()
                    }
                }
            };
            names.insert(message.sender.clone(), name);
        }
        names
    }
}
