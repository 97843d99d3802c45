//! Error handling for the chat client core
//!
//! All fallible operations return [`Result`], an alias over [`ChatError`].
//! Conversions from `std::io::Error` and `serde_json::Error` are derived with
//! `thiserror`, so `?` works across file and serialization boundaries.
//!
//! ## Error Categories
//!
//! ### Backend Errors
//! Failures reported by the external store or auth provider
//! (`Backend`, `Timeout`). These are transient from the
//! client's point of view.
//!
//! ### Session Errors
//! `NotSignedIn` and `InvalidCredentials`: the user must sign in again.
//!
//! ### Input Errors
//! `InvalidInput`, `UsernameTaken`, `EmailTaken`: the user must change what
//! they typed.
//!
//! ```rust
//! use chatsync_core::ChatError;
//!
//! let error = ChatError::UsernameTaken;
//! assert_eq!(error.to_string(), "Username already exists");
//! assert!(!error.is_recoverable());
//! ```

use thiserror::Error;

/// Result type for chat client operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur in the chat client core
#[derive(Error, Debug)]
pub enum ChatError {
    /// I/O error (data file, config file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external store or auth provider reported a failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// A document that was expected to exist is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation requires a signed-in user
    #[error("Not signed in")]
    NotSignedIn,

    /// User-supplied input failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Registration with a username another account already uses
    #[error("Username already exists")]
    UsernameTaken,

    /// Registration with an email another account already uses
    #[error("Email already exists")]
    EmailTaken,

    /// Sign-in with an unknown email or a wrong password
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// A backend call did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl ChatError {
    /// Create a backend error from anything displayable
    pub fn backend(msg: impl Into<String>) -> Self {
        ChatError::Backend(msg.into())
    }

    /// Create an input validation error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        ChatError::InvalidInput(msg.into())
    }

    /// Whether retrying the same call later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::Backend(_) | ChatError::Timeout(_) | ChatError::Io(_)
        )
    }

    /// Whether the user has to do something (sign in, edit input) first
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ChatError::NotSignedIn
                | ChatError::InvalidCredentials
                | ChatError::InvalidInput(_)
                | ChatError::UsernameTaken
                | ChatError::EmailTaken
        )
    }

    /// Short message suitable for a toast or status line
    pub fn user_message(&self) -> String {
        match self {
            ChatError::NotSignedIn => "Please sign in first.".to_string(),
            ChatError::InvalidCredentials => "Login Unsuccessful".to_string(),
            ChatError::UsernameTaken => "Username already exists".to_string(),
            ChatError::EmailTaken => "Email already exists".to_string(),
            ChatError::InvalidInput(msg) => msg.clone(),
            ChatError::Timeout(_) => {
                "The server took too long to respond. Check your connection.".to_string()
            }
            ChatError::Backend(_) => "Something went wrong. Please try again.".to_string(),
            ChatError::NotFound(what) => format!("{} not found.", what),
            ChatError::Io(e) => format!("File error: {}.", e),
            ChatError::Json(e) => format!("Corrupt data: {}.", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ChatError::NotSignedIn.to_string(), "Not signed in");
        assert_eq!(ChatError::EmailTaken.to_string(), "Email already exists");
        assert_eq!(
            ChatError::backend("quota exceeded").to_string(),
            "Backend error: quota exceeded"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(ChatError::backend("offline").is_recoverable());
        assert!(ChatError::Timeout("profile lookup".into()).is_recoverable());
        assert!(!ChatError::NotSignedIn.is_recoverable());

        assert!(ChatError::NotSignedIn.requires_user_action());
        assert!(ChatError::invalid_input("blank message").requires_user_action());
        assert!(!ChatError::backend("offline").requires_user_action());
    }

    #[test]
    fn test_io_conversion() {
        fn open_missing() -> Result<()> {
            std::fs::read("/definitely/not/here/chatsync.json")?;
            Ok(())
        }

        assert!(matches!(open_missing(), Err(ChatError::Io(_))));
    }

    #[test]
    fn test_user_message() {
        assert_eq!(ChatError::UsernameTaken.user_message(), "Username already exists");
        assert_eq!(
            ChatError::NotFound("Chat".into()).user_message(),
            "Chat not found."
        );
    }
}
