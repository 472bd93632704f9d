//! Input validation for user-provided connection values.
//!
//! Provides validation functions for ports and connection nicknames so that
//! values are rejected at the boundary, before they reach the SSH config
//! file or the group store.

use regex::Regex;
use std::sync::LazyLock;

/// Validation error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

// Quotes cannot be escaped on a Host line, wildcard and negation characters
// would turn the nickname into a pattern rule.
static NICKNAME_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["*?!,\p{Cc}]"#).unwrap());

/// Validate a port number string and parse it.
///
/// # Errors
///
/// Returns `ValidationError` if the port is not a valid number in range 1-65535.
pub fn validate_port(port_str: &str) -> Result<u16, ValidationError> {
    let port_str = port_str.trim();

    if port_str.is_empty() {
        return Err(ValidationError::new("port", "Port is required"));
    }

    match port_str.parse::<u32>() {
        Ok(port) => validate_port_number(port),
        Err(_) => Err(ValidationError::new(
            "port",
            format!("Invalid port number: '{}'", port_str),
        )),
    }
}

/// Validate a numeric port value.
///
/// # Errors
///
/// Returns `ValidationError` if the value lies outside 1-65535.
pub fn validate_port_number(port: u32) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ValidationError::new(
            "port",
            format!("Port must be between 1 and 65535, got {}", port),
        )),
    }
}

/// Validate a connection nickname (the primary pattern of a Host line).
///
/// Whitespace is allowed (the serializer quotes it), but the nickname must
/// not be empty and must not contain quotes, pattern characters or
/// control characters.
///
/// # Errors
///
/// Returns `ValidationError` describing the first problem found.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        return Err(ValidationError::new("nickname", "Nickname is required"));
    }

    if nickname.trim() != nickname {
        return Err(ValidationError::new(
            "nickname",
            "Nickname must not start or end with whitespace",
        ));
    }

    if nickname.starts_with('#') {
        return Err(ValidationError::new(
            "nickname",
            "Nickname must not start with '#'",
        ));
    }

    if NICKNAME_FORBIDDEN.is_match(nickname) {
        return Err(ValidationError::new(
            "nickname",
            "Nickname must not contain quotes, wildcards, '!', ',' or control characters",
        ));
    }

    Ok(())
}
