//! Credential storage for connection passwords and key passphrases.
//!
//! Secrets live in the platform keyring under the `sshPilot` service.
//! Passwords use `user@host` as the account; key passphrases use the key's
//! path. Values travel as [`SecretString`] and are only exposed at the
//! backend boundary.

use std::collections::HashMap;
use std::sync::Mutex;

use secrecy::{ExposeSecret, SecretString};

use crate::config::AppConfig;
use crate::error::SecretError;

/// Keyring service name
pub const SERVICE_NAME: &str = "sshPilot";

/// Identifies one stored secret
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretKey {
    Password { host: String, username: String },
    KeyPassphrase { key_path: String },
}

impl SecretKey {
    pub fn password(host: impl Into<String>, username: impl Into<String>) -> Self {
        SecretKey::Password {
            host: host.into(),
            username: username.into(),
        }
    }

    pub fn key_passphrase(key_path: impl Into<String>) -> Self {
        SecretKey::KeyPassphrase {
            key_path: key_path.into(),
        }
    }

    /// Keyring account name
    pub fn account(&self) -> String {
        match self {
            SecretKey::Password { host, username } => format!("{}@{}", username, host),
            SecretKey::KeyPassphrase { key_path } => key_path.clone(),
        }
    }

    /// Short label used in audit logs
    pub fn kind(&self) -> &'static str {
        match self {
            SecretKey::Password { .. } => "password",
            SecretKey::KeyPassphrase { .. } => "key_passphrase",
        }
    }
}

/// A backend able to persist secrets
pub trait SecretStore: Send + Sync {
    fn set(&self, key: &SecretKey, secret: &SecretString) -> Result<(), SecretError>;

    /// `Ok(None)` when nothing is stored for `key`
    fn get(&self, key: &SecretKey) -> Result<Option<SecretString>, SecretError>;

    /// `Ok(false)` when there was nothing to delete
    fn delete(&self, key: &SecretKey) -> Result<bool, SecretError>;
}

/// Platform keyring (Secret Service, macOS Keychain, Windows Credential Manager)
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &SecretKey) -> Result<keyring::Entry, SecretError> {
        Ok(keyring::Entry::new(&self.service, &key.account())?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn set(&self, key: &SecretKey, secret: &SecretString) -> Result<(), SecretError> {
        self.entry(key)?.set_password(secret.expose_secret())?;
        Ok(())
    }

    fn get(&self, key: &SecretKey) -> Result<Option<SecretString>, SecretError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &SecretKey) -> Result<bool, SecretError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, used in tests and when no keyring is wanted but
/// secrets should still survive for the session
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<SecretKey, SecretString>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn set(&self, key: &SecretKey, secret: &SecretString) -> Result<(), SecretError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretError::Backend("memory store poisoned".to_string()))?;
        entries.insert(
            key.clone(),
            SecretString::from(secret.expose_secret().to_string()),
        );
        Ok(())
    }

    fn get(&self, key: &SecretKey) -> Result<Option<SecretString>, SecretError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SecretError::Backend("memory store poisoned".to_string()))?;
        Ok(entries
            .get(key)
            .map(|s| SecretString::from(s.expose_secret().to_string())))
    }

    fn delete(&self, key: &SecretKey) -> Result<bool, SecretError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretError::Backend("memory store poisoned".to_string()))?;
        Ok(entries.remove(key).is_some())
    }
}

/// Store used when secret storage is turned off in settings
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

impl SecretStore for DisabledStore {
    fn set(&self, _key: &SecretKey, _secret: &SecretString) -> Result<(), SecretError> {
        Err(SecretError::Unavailable("secret storage disabled".to_string()))
    }

    fn get(&self, _key: &SecretKey) -> Result<Option<SecretString>, SecretError> {
        Ok(None)
    }

    fn delete(&self, _key: &SecretKey) -> Result<bool, SecretError> {
        Ok(false)
    }
}

/// Pick the backend configured in settings
pub fn store_for(config: &AppConfig) -> Box<dyn SecretStore> {
    if config.ssh.use_secret_storage {
        Box::new(KeyringStore::new())
    } else {
        tracing::info!("Secret storage disabled in settings");
        Box::new(DisabledStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_names() {
        assert_eq!(SecretKey::password("h", "u").account(), "u@h");
        assert_eq!(
            SecretKey::key_passphrase("/home/u/.ssh/id").account(),
            "/home/u/.ssh/id"
        );
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let key = SecretKey::password("10.0.0.1", "alice");
        assert!(store.get(&key).unwrap().is_none());

        store.set(&key, &SecretString::from("s3cret".to_string())).unwrap();
        let value = store.get(&key).unwrap().unwrap();
        assert_eq!(value.expose_secret(), "s3cret");

        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn passwords_and_passphrases_do_not_collide() {
        let store = MemoryStore::new();
        store
            .set(&SecretKey::password("h", "u"), &SecretString::from("pw".to_string()))
            .unwrap();
        assert!(store.get(&SecretKey::key_passphrase("u@h")).unwrap().is_none());
    }

    #[test]
    fn disabled_store_refuses_writes() {
        let store = DisabledStore;
        let key = SecretKey::password("h", "u");
        assert!(matches!(
            store.set(&key, &SecretString::from("x".to_string())),
            Err(SecretError::Unavailable(_))
        ));
        assert!(store.get(&key).unwrap().is_none());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn store_selection_follows_settings() {
        let mut config = AppConfig::default();
        config.ssh.use_secret_storage = false;
        let store = store_for(&config);
        assert!(store.get(&SecretKey::password("h", "u")).unwrap().is_none());
    }
}
