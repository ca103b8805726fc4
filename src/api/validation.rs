//! Input validation for API requests.
//!
//! Individual validators return `Result<(), String>`; handlers collect
//! failures with the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    /// Usernames: alphanumeric plus `._-`, 3-32 chars
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]{2,31}$").unwrap();
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-32 characters, alphanumeric with dots, dashes or underscores"
                .to_string(),
        );
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    Ok(())
}

/// Validate a required free-text field (title, author, etc.)
pub fn validate_text_field(value: &str, label: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", label));
    }

    if value.len() > max_len {
        return Err(format!("{} is too long (max {} characters)", label, max_len));
    }

    Ok(())
}

/// Validate that an identifier is a well-formed uuid
pub fn validate_uuid(id: &str, field: &str) -> Result<(), String> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| format!("{} is not a valid identifier", field))
}
