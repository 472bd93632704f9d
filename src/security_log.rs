//! Security event logging for audit trails.
//!
//! Secret storage and connection lifecycle events are logged with
//! `target: "security"` so they can be filtered separately:
//!
//! ```bash
//! RUST_LOG=security=info sshpilot
//! ```
//!
//! Secret values never reach these functions; only the account they belong to.

use tracing::{info, warn};

/// Log that a secret was written to the credential store.
pub fn log_secret_stored(kind: &str, account: &str) {
    info!(
        target: "security",
        event = "secret_stored",
        kind = %kind,
        account = %account,
        "Secret stored"
    );
}

/// Log that a secret was deleted from the credential store.
pub fn log_secret_removed(kind: &str, account: &str) {
    info!(
        target: "security",
        event = "secret_removed",
        kind = %kind,
        account = %account,
        "Secret removed"
    );
}

/// Log a credential store operation that could not be completed.
pub fn log_secret_unavailable(kind: &str, account: &str, reason: &str) {
    warn!(
        target: "security",
        event = "secret_unavailable",
        kind = %kind,
        account = %account,
        reason = %reason,
        "Secret storage unavailable"
    );
}

/// Log a connection attempt.
pub fn log_connect_attempt(nickname: &str, host: &str, port: u16, username: &str) {
    info!(
        target: "security",
        event = "connect_attempt",
        nickname = %nickname,
        host = %host,
        port = port,
        username = %username,
        "SSH connection attempt"
    );
}

pub fn log_connect_success(nickname: &str, host: &str, port: u16) {
    info!(
        target: "security",
        event = "connect_success",
        nickname = %nickname,
        host = %host,
        port = port,
        "SSH connection established"
    );
}

pub fn log_connect_failure(nickname: &str, host: &str, port: u16, reason: &str) {
    warn!(
        target: "security",
        event = "connect_failure",
        nickname = %nickname,
        host = %host,
        port = port,
        reason = %reason,
        "SSH connection failed"
    );
}

pub fn log_disconnect(nickname: &str, host: &str) {
    info!(
        target: "security",
        event = "disconnect",
        nickname = %nickname,
        host = %host,
        "SSH connection closed"
    );
}
