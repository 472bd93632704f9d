use std::path::PathBuf;
use thiserror::Error;

use crate::config::groups::GroupId;
use crate::validation::ValidationError;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to parse group store '{path}': {source}")]
    ParseGroups {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize group store: {0}")]
    SerializeGroups(serde_json::Error),

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
}

/// Errors raised while reading or rewriting an OpenSSH client config file
#[derive(Error, Debug)]
pub enum SshConfigError {
    #[error("Failed to read SSH config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write SSH config '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid Host block at line {line}: {reason}")]
    InvalidBlock { line: usize, reason: String },

    #[error("Could not determine SSH config path")]
    NoConfigPath,
}

/// Export and import of configuration backups
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to read backup '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid backup file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported backup version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Failed to serialize backup: {0}")]
    Serialize(serde_json::Error),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Structural violations of the group tree
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("A group named '{0}' already exists")]
    DuplicateName(String),

    #[error("Group name must not be empty")]
    EmptyName,

    #[error("Group not found: {0}")]
    NotFound(GroupId),

    #[error("Cannot move group {group} under its own descendant {target}")]
    Cycle { group: GroupId, target: GroupId },

    #[error("Groups {source_id} and {target_id} do not share a parent")]
    DifferentParents {
        source_id: GroupId,
        target_id: GroupId,
    },

    #[error("Connections '{0}' and '{1}' are not in the same group")]
    DifferentGroups(String, String),

    #[error("Connection '{0}' is not tracked by any group")]
    UnknownConnection(String),

    #[error(transparent)]
    Persist(#[from] ConfigError),
}

/// Connection bookkeeping errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("A connection named '{0}' already exists")]
    DuplicateNickname(String),

    #[error("Connection not found: {0}")]
    NotFound(String),

    #[error("Connection '{0}' has no target host")]
    MissingTarget(String),

    #[error("Invalid connection: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Invalid state transition for '{nickname}': {from} -> {to}")]
    InvalidTransition {
        nickname: String,
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
}

/// Secret storage backend errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret storage unavailable: {0}")]
    Unavailable(String),

    #[error("Secret storage failure: {0}")]
    Backend(String),
}

impl From<keyring::Error> for SecretError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(e) | keyring::Error::PlatformFailure(e) => {
                SecretError::Unavailable(e.to_string())
            }
            other => SecretError::Backend(other.to_string()),
        }
    }
}
