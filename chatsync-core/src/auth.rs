//! Authentication Session
//!
//! Wraps an [`AuthProvider`] with the client-side rules for signing in and
//! registering, and publishes the progress of the latest attempt as an
//! [`AuthStatus`] for the UI to render.
//!
//! ## Registration
//!
//! 1. Validate username, email and password locally
//! 2. Reject a username another profile already uses
//! 3. Create the account (the provider rejects a duplicate email)
//! 4. Write the profile document `{uid, email, username, timestamp}`
//!
//! ## Signed-in User
//!
//! Besides the status, the session publishes the UID of whoever signed in or
//! out through it, so live views can switch users without being rebuilt.

use crate::models::UserProfile;
use crate::store::{AuthProvider, ProfileStore};
use crate::validate::{is_valid_email, is_valid_password, is_valid_username};
use crate::{ChatError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Progress of the latest sign-in or registration attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthStatus {
    /// An attempt is in flight
    pub loading: bool,

    /// The latest attempt succeeded
    pub success: bool,

    /// Message of the latest failure
    pub error: Option<String>,
}

/// Sign-in state for one client
pub struct AuthSession {
    provider: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    status_tx: watch::Sender<AuthStatus>,
    user_tx: watch::Sender<Option<String>>,
}

impl AuthSession {
    /// Create over the given provider and profile store
    pub fn new(provider: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::default());
        let (user_tx, _) = watch::channel(provider.current_user());

        Self {
            provider,
            profiles,
            status_tx,
            user_tx,
        }
    }

    /// The underlying provider, for components that need the current user
    pub fn provider(&self) -> Arc<dyn AuthProvider> {
        self.provider.clone()
    }

    /// Whether someone is signed in
    pub fn is_logged_in(&self) -> bool {
        self.provider.current_user().is_some()
    }

    /// UID of the signed-in user
    pub fn current_uid(&self) -> Option<String> {
        self.provider.current_user()
    }

    /// Status of the latest attempt
    pub fn status(&self) -> AuthStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver that sees every status change
    pub fn watch_status(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    /// Receiver that sees every sign-in and sign-out made through this session
    pub fn watch_user(&self) -> watch::Receiver<Option<String>> {
        self.user_tx.subscribe()
    }

    /// Clear success and error after the UI has reacted to them
    pub fn reset_status(&self) {
        self.status_tx.send_modify(|status| {
            status.success = false;
            status.error = None;
        });
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(self.reject(ChatError::invalid_input("Invalid email address")));
        }
        if !is_valid_password(password) {
            return Err(self.reject(ChatError::invalid_input(
                "Password must be at least 6 characters",
            )));
        }

        self.begin();
        let result = self.provider.sign_in(email, password).await;
        self.finish(&result);

        if let Ok(uid) = &result {
            info!("User {} logged in", uid);
            self.user_tx.send_replace(Some(uid.clone()));
        }
        result
    }

    /// Create an account and its profile, leaving the new user signed in
    pub async fn register(&self, email: &str, password: &str, username: &str) -> Result<String> {
        let email = email.trim();
        let username = username.trim();
        if !is_valid_username(username) {
            return Err(self.reject(ChatError::invalid_input(
                "Username must be 3-15 lowercase letters or digits, starting with a letter",
            )));
        }
        if !is_valid_email(email) {
            return Err(self.reject(ChatError::invalid_input("Invalid email address")));
        }
        if !is_valid_password(password) {
            return Err(self.reject(ChatError::invalid_input(
                "Password must be at least 6 characters",
            )));
        }

        self.begin();
        let result = self.create_account(email, password, username).await;
        self.finish(&result);

        if let Ok(uid) = &result {
            info!("Registered user {} as '{}'", uid, username);
            self.user_tx.send_replace(Some(uid.clone()));
        }
        result
    }

    async fn create_account(&self, email: &str, password: &str, username: &str) -> Result<String> {
        if self.profiles.find_by_username(username).await?.is_some() {
            return Err(ChatError::UsernameTaken);
        }

        let uid = self.provider.create_user(email, password).await?;
        self.profiles
            .put_profile(UserProfile::new(&uid, username, email))
            .await?;
        Ok(uid)
    }

    /// Sign out the current user
    pub async fn logout(&self) {
        if let Some(uid) = self.provider.current_user() {
            info!("User {} logged out", uid);
        }
        self.provider.sign_out().await;
        self.status_tx.send_replace(AuthStatus::default());
        self.user_tx.send_replace(None);
    }

    fn begin(&self) {
        self.status_tx.send_replace(AuthStatus {
            loading: true,
            success: false,
            error: None,
        });
    }

    fn finish(&self, result: &Result<String>) {
        match result {
            Ok(_) => {
                self.status_tx.send_replace(AuthStatus {
                    loading: false,
                    success: true,
                    error: None,
                });
            }
            Err(e) => self.publish_error(e),
        }
    }

    /// Record a failure that happened before reaching the provider
    fn reject(&self, error: ChatError) -> ChatError {
        self.publish_error(&error);
        error
    }

    fn publish_error(&self, error: &ChatError) {
        warn!("Authentication failed: {}", error);
        self.status_tx.send_replace(AuthStatus {
            loading: false,
            success: false,
            error: Some(error.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn session_over(backend: &MemoryBackend) -> AuthSession {
        let backend = Arc::new(backend.clone());
        AuthSession::new(backend.clone(), backend)
    }

    #[tokio::test]
    async fn test_register_creates_profile_and_signs_in() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);

        let uid = session
            .register("ann@example.com", "secret1", " ann ")
            .await
            .unwrap();

        assert!(session.is_logged_in());
        assert_eq!(session.current_uid(), Some(uid.clone()));
        assert!(session.status().success);

        let profile = backend.snapshot().unwrap().users[&uid].clone();
        assert_eq!(profile.username, "ann");
        assert_eq!(profile.email, "ann@example.com");
    }

    #[tokio::test]
    async fn test_register_rejects_taken_username() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);
        session
            .register("ann@example.com", "secret1", "ann")
            .await
            .unwrap();
        session.logout().await;

        let err = session
            .register("other@example.com", "secret1", "ann")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UsernameTaken));
        assert_eq!(session.status().error.as_deref(), Some("Username already exists"));
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_register_rejects_taken_email() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);
        session
            .register("ann@example.com", "secret1", "ann")
            .await
            .unwrap();
        session.logout().await;

        let err = session
            .register("ann@example.com", "secret1", "annie")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmailTaken));
    }

    #[tokio::test]
    async fn test_register_validates_before_backend() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);

        for (email, password, username) in [
            ("ann@example.com", "secret1", "Ann"),
            ("not-an-email", "secret1", "ann"),
            ("ann@example.com", "short", "ann"),
        ] {
            let err = session.register(email, password, username).await.unwrap_err();
            assert!(matches!(err, ChatError::InvalidInput(_)));
        }
        assert!(backend.snapshot().unwrap().accounts.is_empty());
    }

    #[tokio::test]
    async fn test_login_logout_and_status() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);
        session
            .register("bob@example.com", "secret1", "bob")
            .await
            .unwrap();
        session.logout().await;
        assert_eq!(session.status(), AuthStatus::default());

        let err = session.login("bob@example.com", "wrong12").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidCredentials));
        assert!(session.status().error.is_some());

        session.reset_status();
        assert_eq!(session.status(), AuthStatus::default());

        let mut status_rx = session.watch_status();
        session.login("bob@example.com", "secret1").await.unwrap();
        assert!(status_rx.borrow_and_update().success);
        assert!(session.is_logged_in());
    }

    #[tokio::test]
    async fn test_watch_user_follows_login_and_logout() {
        let backend = MemoryBackend::new();
        let session = session_over(&backend);
        let mut user_rx = session.watch_user();
        assert_eq!(*user_rx.borrow_and_update(), None);

        let uid = session
            .register("cat@example.com", "secret1", "cat")
            .await
            .unwrap();
        assert!(user_rx.has_changed().unwrap());
        assert_eq!(*user_rx.borrow_and_update(), Some(uid.clone()));

        session.logout().await;
        assert_eq!(*user_rx.borrow_and_update(), None);

        // A failed attempt leaves the signed-out state untouched
        session.login("cat@example.com", "wrong12").await.unwrap_err();
        assert!(!user_rx.has_changed().unwrap());

        session.login("cat@example.com", "secret1").await.unwrap();
        assert_eq!(*user_rx.borrow_and_update(), Some(uid));

        // A new session starts from whoever the provider already has
        let resumed = session_over(&backend);
        assert_eq!(*resumed.watch_user().borrow(), resumed.current_uid());
    }
}
