//! Input validation for the sign-in and registration forms

use regex::Regex;
use std::sync::OnceLock;

/// Minimum password length, in characters
pub const MIN_PASSWORD_LEN: usize = 6;

/// Allowed username length, in characters
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=15;

static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn email_pattern() -> &'static Regex {
    EMAIL_PATTERN.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9+._%\-]{1,256}@[a-zA-Z0-9][a-zA-Z0-9\-]{0,64}(\.[a-zA-Z0-9][a-zA-Z0-9\-]{0,25})+$",
        )
        .expect("email pattern is valid")
    })
}

/// Whether `email` looks like an email address
pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email)
}

/// Whether `password` is long enough
pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}

/// Whether `username` is 3-15 letters or digits, starts with a letter, and
/// has no uppercase letters
pub fn is_valid_username(username: &str) -> bool {
    let Some(first) = username.chars().next() else {
        return false;
    };

    USERNAME_LEN.contains(&username.chars().count())
        && first.is_alphabetic()
        && username.chars().all(char::is_alphanumeric)
        && username.chars().all(|c| !c.is_alphabetic() || c.is_lowercase())
}
