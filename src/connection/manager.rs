//! Owns the connection list and keeps it in step with the SSH config files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tokio::sync::broadcast;

use super::{ConnectionProfile, ConnectionRecord, ConnectionState};
use crate::config::AppConfig;
use crate::config::paths::{ensure_private_dir, ssh_config_file};
use crate::error::{ConnectionError, SecretError, SshConfigError};
use crate::secrets::{SecretKey, SecretStore, store_for};
use crate::security_log;
use crate::ssh_config::parser::split_tokens;
use crate::ssh_config::{
    Block, HostBlock, MatchBlock, SshConfig, append_host_block, build_record, host_matches,
    load_config_sources, remove_host_block, replace_host_block,
};
use crate::validation::validate_nickname;

/// Text written to a freshly created config file
const NEW_CONFIG_HEADER: &str = "# SSH configuration file\n";

const EVENT_CAPACITY: usize = 64;

/// Change notifications, sent after the in-memory mutation completes
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Added(ConnectionRecord),
    Updated {
        previous_nickname: String,
        record: ConnectionRecord,
    },
    Removed(ConnectionRecord),
    StatusChanged {
        nickname: String,
        state: ConnectionState,
    },
}

/// A block that applies to several hosts rather than describing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRule {
    /// `Host` block with wildcard or negated patterns
    Host { block: HostBlock, source: PathBuf },
    /// `Match` block, kept verbatim
    Match { block: MatchBlock, source: PathBuf },
}

impl ConfigRule {
    pub fn source(&self) -> &Path {
        match self {
            ConfigRule::Host { source, .. } | ConfigRule::Match { source, .. } => source,
        }
    }

    /// Whether this rule applies to `nickname`. `Match` blocks are only
    /// evaluated for `all` and a lone `host` criterion; anything else needs
    /// runtime context and is reported as not matching.
    pub fn applies_to(&self, nickname: &str) -> bool {
        match self {
            ConfigRule::Host { block, .. } => host_matches(nickname, &block.patterns),
            ConfigRule::Match { block, .. } => {
                let tokens = split_tokens(&block.criteria);
                match tokens.as_slice() {
                    [all] if all.eq_ignore_ascii_case("all") => true,
                    [host, patterns] if host.eq_ignore_ascii_case("host") => {
                        let patterns: Vec<String> =
                            patterns.split(',').map(str::to_string).collect();
                        host_matches(nickname, &patterns)
                    }
                    _ => false,
                }
            }
        }
    }
}

/// Connection list backed by an OpenSSH client config file
pub struct ConnectionManager {
    config_path: PathBuf,
    connections: Vec<ConnectionRecord>,
    rules: Vec<ConfigRule>,
    states: HashMap<String, ConnectionState>,
    warnings: Vec<String>,
    secrets: Box<dyn SecretStore>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager for `config_path`. Nothing is read until [`load`].
    ///
    /// [`load`]: ConnectionManager::load
    pub fn new(config_path: impl Into<PathBuf>, secrets: Box<dyn SecretStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config_path: config_path.into(),
            connections: Vec::new(),
            rules: Vec::new(),
            states: HashMap::new(),
            warnings: Vec::new(),
            secrets,
            events,
        }
    }

    /// Create a manager from application settings: config path resolution
    /// and secret backend both follow `config`
    pub fn from_settings(config: &AppConfig) -> Result<Self, ConnectionError> {
        let path = ssh_config_file(config.ssh.config_path.as_deref())
            .ok_or(SshConfigError::NoConfigPath)?;
        Ok(Self::new(path, store_for(config)))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Receive change notifications. Events sent before subscribing are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Read the config file and every file it includes, rebuilding the
    /// connection and rule lists. A missing main file is created with a
    /// comment header. Blocks that cannot be turned into a record are skipped
    /// and reported through [`warnings`](ConnectionManager::warnings).
    pub fn load(&mut self) -> Result<(), ConnectionError> {
        if !self.config_path.exists() {
            tracing::info!(
                "SSH config {} not found, creating empty one",
                self.config_path.display()
            );
            if let Some(parent) = self.config_path.parent() {
                ensure_private_dir(parent).map_err(|source| SshConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            write_config(&self.config_path, NEW_CONFIG_HEADER)?;
        }

        let mut connections: Vec<ConnectionRecord> = Vec::new();
        let mut rules = Vec::new();
        let mut warnings = Vec::new();

        for source in load_config_sources(&self.config_path) {
            let record_source = (source.path != self.config_path).then(|| source.path.clone());

            for block in SshConfig::parse(&source.content).blocks {
                match block {
                    Block::Match(block) => rules.push(ConfigRule::Match {
                        block,
                        source: source.path.clone(),
                    }),
                    Block::Host(block) => match build_record(&block) {
                        Ok(Some(mut record)) => {
                            let clash = record
                                .names()
                                .find(|n| connections.iter().any(|c| c.answers_to(n)));
                            if let Some(name) = clash {
                                let message = format!(
                                    "{}: Host '{}' ignored, '{}' is already defined (first definition wins)",
                                    source.path.display(),
                                    record.nickname,
                                    name
                                );
                                tracing::warn!("{}", message);
                                warnings.push(message);
                                continue;
                            }
                            record.source = record_source.clone();
                            connections.push(record);
                        }
                        Ok(None) => rules.push(ConfigRule::Host {
                            block,
                            source: source.path.clone(),
                        }),
                        Err(e) => {
                            let message = format!("{}: {}", source.path.display(), e);
                            tracing::warn!("Skipping block: {}", message);
                            warnings.push(message);
                        }
                    },
                }
            }
        }

        self.states
            .retain(|nickname, _| connections.iter().any(|c| &c.nickname == nickname));
        self.connections = connections;
        self.rules = rules;
        self.warnings = warnings;

        tracing::info!(
            "Loaded {} connections and {} rules from {}",
            self.connections.len(),
            self.rules.len(),
            self.config_path.display()
        );
        Ok(())
    }

    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    pub fn rules(&self) -> &[ConfigRule] {
        &self.rules
    }

    /// Rules that apply to `nickname`, in file order
    pub fn rules_for(&self, nickname: &str) -> Vec<&ConfigRule> {
        self.rules.iter().filter(|r| r.applies_to(nickname)).collect()
    }

    /// Problems found during the last [`load`](ConnectionManager::load)
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Case-insensitive lookup by nickname
    pub fn find_connection(&self, nickname: &str) -> Option<&ConnectionRecord> {
        self.connections.iter().find(|c| c.has_nickname(nickname))
    }

    /// Connections matching a sidebar search, in file order
    pub fn search(&self, query: &str) -> Vec<&ConnectionRecord> {
        self.connections
            .iter()
            .filter(|c| c.matches_query(query))
            .collect()
    }

    fn position(&self, nickname: &str) -> Result<usize, ConnectionError> {
        self.connections
            .iter()
            .position(|c| c.has_nickname(nickname))
            .ok_or_else(|| ConnectionError::NotFound(nickname.to_string()))
    }

    fn validate(&self, record: &ConnectionRecord, skip: Option<usize>) -> Result<(), ConnectionError> {
        validate_nickname(&record.nickname)?;
        for alias in &record.aliases {
            validate_nickname(alias)?;
        }

        if record.hostname.trim().is_empty() && record.nickname.contains(char::is_whitespace) {
            return Err(ConnectionError::MissingTarget(record.nickname.clone()));
        }

        for name in record.names() {
            let taken = self
                .connections
                .iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != skip)
                .any(|(_, c)| c.answers_to(name));
            if taken {
                return Err(ConnectionError::DuplicateNickname(name.clone()));
            }
        }
        Ok(())
    }

    fn source_path(&self, record: &ConnectionRecord) -> PathBuf {
        record
            .source
            .clone()
            .unwrap_or_else(|| self.config_path.clone())
    }

    /// Add a new connection and append its block to the main config file
    pub fn save_connection(&mut self, mut record: ConnectionRecord) -> Result<(), ConnectionError> {
        self.validate(&record, None)?;
        record.source = None;

        self.connections.push(record.clone());
        tracing::info!("Connection added: {}", record.nickname);
        self.emit(ConnectionEvent::Added(record.clone()));

        let content = read_config(&self.config_path)?;
        write_config(&self.config_path, &append_host_block(&content, &record))
            .inspect_err(|e| tracing::error!("Failed to persist '{}': {}", record.nickname, e))?;
        Ok(())
    }

    /// Replace the connection known as `original_nickname` with `changes`.
    ///
    /// The block is located by the original nickname, so a rename rewrites
    /// the existing block instead of adding a second one. The record keeps
    /// the file it was loaded from.
    pub fn update_connection(
        &mut self,
        original_nickname: &str,
        mut changes: ConnectionRecord,
    ) -> Result<(), ConnectionError> {
        let idx = self.position(original_nickname)?;
        self.validate(&changes, Some(idx))?;

        let previous = std::mem::replace(&mut self.connections[idx], changes.clone());
        changes.source = previous.source.clone();
        self.connections[idx].source = previous.source.clone();

        if previous.nickname != changes.nickname {
            if let Some(state) = self.states.remove(&previous.nickname) {
                self.states.insert(changes.nickname.clone(), state);
            }
        }

        tracing::info!(
            "Connection updated: {} -> {} ({} forwarding rules)",
            previous.nickname,
            changes.nickname,
            changes.forwarding_rules.len()
        );
        self.emit(ConnectionEvent::Updated {
            previous_nickname: previous.nickname.clone(),
            record: changes.clone(),
        });

        let old_key = SecretKey::password(previous.target_host(), &previous.effective_username());
        let new_key = SecretKey::password(changes.target_host(), &changes.effective_username());
        if old_key != new_key {
            self.move_secret(&old_key, &new_key);
        }

        let path = self.source_path(&previous);
        let content = read_config(&path)?;
        let (updated, found) = replace_host_block(&content, &previous.nickname, &changes);
        if !found {
            tracing::warn!(
                "No block for '{}' in {}, appended instead",
                previous.nickname,
                path.display()
            );
        }
        write_config(&path, &updated)
            .inspect_err(|e| tracing::error!("Failed to persist '{}': {}", changes.nickname, e))?;
        Ok(())
    }

    /// Remove a connection, its stored password and its block on disk
    pub fn remove_connection(&mut self, nickname: &str) -> Result<ConnectionRecord, ConnectionError> {
        let idx = self.position(nickname)?;
        let record = self.connections.remove(idx);
        self.states.remove(&record.nickname);

        self.delete_password(record.target_host(), &record.effective_username());

        tracing::info!("Connection removed: {}", record.nickname);
        self.emit(ConnectionEvent::Removed(record.clone()));

        let path = self.source_path(&record);
        let content = read_config(&path)?;
        match remove_host_block(&content, &record.nickname) {
            Some(updated) => write_config(&path, &updated).inspect_err(|e| {
                tracing::error!("Failed to remove '{}' from disk: {}", record.nickname, e)
            })?,
            None => tracing::debug!(
                "No block for '{}' in {}, nothing to strip",
                record.nickname,
                path.display()
            ),
        }
        Ok(record)
    }

    // Secret storage. Failures are logged and reported as None / false.

    fn store_secret(&self, key: &SecretKey, secret: &SecretString) -> bool {
        match self.secrets.set(key, secret) {
            Ok(()) => {
                security_log::log_secret_stored(key.kind(), &key.account());
                true
            }
            Err(e) => {
                security_log::log_secret_unavailable(key.kind(), &key.account(), &e.to_string());
                false
            }
        }
    }

    fn get_secret(&self, key: &SecretKey) -> Option<SecretString> {
        self.secrets
            .get(key)
            .inspect_err(|e: &SecretError| {
                security_log::log_secret_unavailable(key.kind(), &key.account(), &e.to_string())
            })
            .ok()
            .flatten()
    }

    fn delete_secret(&self, key: &SecretKey) -> bool {
        match self.secrets.delete(key) {
            Ok(true) => {
                security_log::log_secret_removed(key.kind(), &key.account());
                true
            }
            Ok(false) => false,
            Err(e) => {
                security_log::log_secret_unavailable(key.kind(), &key.account(), &e.to_string());
                false
            }
        }
    }

    /// Re-key a stored secret. The old entry is only dropped once the new
    /// one has been written.
    fn move_secret(&self, from: &SecretKey, to: &SecretKey) {
        if let Some(secret) = self.get_secret(from) {
            if self.store_secret(to, &secret) {
                self.delete_secret(from);
            }
        }
    }

    pub fn store_password(&self, host: &str, username: &str, password: &SecretString) -> bool {
        self.store_secret(&SecretKey::password(host, username), password)
    }

    pub fn get_password(&self, host: &str, username: &str) -> Option<SecretString> {
        self.get_secret(&SecretKey::password(host, username))
    }

    pub fn delete_password(&self, host: &str, username: &str) -> bool {
        self.delete_secret(&SecretKey::password(host, username))
    }

    pub fn store_key_passphrase(&self, key_path: &str, passphrase: &SecretString) -> bool {
        self.store_secret(&SecretKey::key_passphrase(key_path), passphrase)
    }

    pub fn get_key_passphrase(&self, key_path: &str) -> Option<SecretString> {
        self.get_secret(&SecretKey::key_passphrase(key_path))
    }

    pub fn delete_key_passphrase(&self, key_path: &str) -> bool {
        self.delete_secret(&SecretKey::key_passphrase(key_path))
    }

    /// Store (`Some`) or clear (`None`) the password for a connection under
    /// its current host and user
    pub fn set_connection_password(
        &self,
        nickname: &str,
        password: Option<&SecretString>,
    ) -> Result<bool, ConnectionError> {
        let record = self
            .find_connection(nickname)
            .ok_or_else(|| ConnectionError::NotFound(nickname.to_string()))?;
        let (host, user) = (record.target_host(), record.effective_username());
        Ok(match password {
            Some(password) => self.store_password(host, &user, password),
            None => self.delete_password(host, &user),
        })
    }

    // Status tracking

    pub fn connection_state(&self, nickname: &str) -> ConnectionState {
        self.find_connection(nickname)
            .and_then(|c| self.states.get(&c.nickname))
            .cloned()
            .unwrap_or_default()
    }

    /// Move a connection to `state`, rejecting transitions the lifecycle does
    /// not allow
    pub fn set_connection_state(
        &mut self,
        nickname: &str,
        state: ConnectionState,
    ) -> Result<(), ConnectionError> {
        let idx = self.position(nickname)?;
        let record = &self.connections[idx];
        let current = self.states.get(&record.nickname).cloned().unwrap_or_default();

        if !current.can_transition_to(&state) {
            return Err(ConnectionError::InvalidTransition {
                nickname: record.nickname.clone(),
                from: current.name(),
                to: state.name(),
            });
        }

        let host = record.target_host();
        match &state {
            ConnectionState::Connecting => security_log::log_connect_attempt(
                &record.nickname,
                host,
                record.port,
                &record.effective_username(),
            ),
            ConnectionState::Connected => {
                security_log::log_connect_success(&record.nickname, host, record.port)
            }
            ConnectionState::Failed(reason) => {
                security_log::log_connect_failure(&record.nickname, host, record.port, reason)
            }
            ConnectionState::Disconnected if current.is_connected() => {
                security_log::log_disconnect(&record.nickname, host)
            }
            _ => {}
        }

        let nickname = record.nickname.clone();
        self.states.insert(nickname.clone(), state.clone());
        self.emit(ConnectionEvent::StatusChanged { nickname, state });
        Ok(())
    }

    pub fn begin_connect(&mut self, nickname: &str) -> Result<(), ConnectionError> {
        self.set_connection_state(nickname, ConnectionState::Connecting)
    }

    pub fn mark_connected(&mut self, nickname: &str) -> Result<(), ConnectionError> {
        self.set_connection_state(nickname, ConnectionState::Connected)
    }

    pub fn mark_failed(&mut self, nickname: &str, reason: impl Into<String>) -> Result<(), ConnectionError> {
        self.set_connection_state(nickname, ConnectionState::Failed(reason.into()))
    }

    pub fn mark_disconnected(&mut self, nickname: &str) -> Result<(), ConnectionError> {
        self.set_connection_state(nickname, ConnectionState::Disconnected)
    }

    /// Resolved `ssh` invocation for a connection
    pub fn profile(&self, nickname: &str) -> Option<ConnectionProfile> {
        self.find_connection(nickname).map(ConnectionProfile::from_record)
    }
}

fn read_config(path: &Path) -> Result<String, SshConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(SshConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_config(path: &Path, content: &str) -> Result<(), SshConfigError> {
    crate::config::write_atomic(path, content).map_err(|source| SshConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ForwardingRule;
    use crate::secrets::MemoryStore;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::TempDir;

    struct FailingStore;

    impl SecretStore for FailingStore {
        fn set(&self, _: &SecretKey, _: &SecretString) -> Result<(), SecretError> {
            Err(SecretError::Unavailable("no keyring".into()))
        }
        fn get(&self, _: &SecretKey) -> Result<Option<SecretString>, SecretError> {
            Err(SecretError::Unavailable("no keyring".into()))
        }
        fn delete(&self, _: &SecretKey) -> Result<bool, SecretError> {
            Err(SecretError::Backend("locked".into()))
        }
    }

    fn manager_with(content: &str) -> (TempDir, ConnectionManager) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, content).unwrap();
        let mut manager = ConnectionManager::new(&path, Box::new(MemoryStore::new()));
        manager.load().unwrap();
        (dir, manager)
    }

    fn read(manager: &ConnectionManager) -> String {
        fs::read_to_string(manager.config_path()).unwrap()
    }

    #[test]
    fn load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".ssh").join("config");
        let mut manager = ConnectionManager::new(&path, Box::new(MemoryStore::new()));
        manager.load().unwrap();
        assert!(manager.connections().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), NEW_CONFIG_HEADER);
    }

    #[test]
    fn load_separates_connections_and_rules() {
        let (_dir, manager) = manager_with(
            "Host *\n  ServerAliveInterval 60\nHost prod\n  HostName 10.0.0.1\nMatch host prod\n  User m\nHost web? !web9\n",
        );
        assert_eq!(manager.connections().len(), 1);
        assert_eq!(manager.rules().len(), 3);
        assert_eq!(manager.rules_for("prod").len(), 2);
        assert_eq!(manager.rules_for("web1").len(), 2);
        assert_eq!(manager.rules_for("web9").len(), 1);
    }

    #[test]
    fn bad_block_is_skipped_with_warning() {
        let (_dir, manager) = manager_with("Host\n  User x\nHost ok\n  HostName h\n");
        assert_eq!(manager.connections().len(), 1);
        assert_eq!(manager.warnings().len(), 1);
    }

    #[test]
    fn duplicate_hosts_keep_first() {
        let (_dir, manager) = manager_with("Host a\n  HostName first\nHost A\n  HostName second\n");
        assert_eq!(manager.connections().len(), 1);
        assert_eq!(manager.connections()[0].hostname, "first");
        assert_eq!(manager.warnings().len(), 1);
    }

    #[test]
    fn included_connections_remember_source() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("config");
        let extra = dir.path().join("work.conf");
        fs::write(&main, "Include work.conf\nHost home\n  HostName h\n").unwrap();
        fs::write(&extra, "Host work\n  HostName w\n").unwrap();

        let mut manager = ConnectionManager::new(&main, Box::new(MemoryStore::new()));
        manager.load().unwrap();
        assert_eq!(manager.find_connection("home").unwrap().source, None);
        assert_eq!(
            manager.find_connection("work").unwrap().source.as_deref(),
            Some(extra.as_path())
        );

        let mut work = manager.find_connection("work").unwrap().clone();
        work.hostname = "w2".to_string();
        manager.update_connection("work", work).unwrap();
        assert_eq!(fs::read_to_string(&extra).unwrap(), "Host work\n    HostName w2\n");
        assert_eq!(
            fs::read_to_string(&main).unwrap(),
            "Include work.conf\nHost home\n  HostName h\n"
        );
    }

    #[test]
    fn save_appends_and_notifies() {
        let (_dir, mut manager) = manager_with("Host a\n  HostName h\n");
        let mut events = manager.subscribe();

        let mut record = ConnectionRecord::new("b");
        record.hostname = "10.0.0.2".to_string();
        record.add_forwarding_rule(ForwardingRule::dynamic("localhost", 1080).unwrap());
        manager.save_connection(record.clone()).unwrap();

        assert_eq!(
            read(&manager),
            "Host a\n  HostName h\n\nHost b\n    HostName 10.0.0.2\n    DynamicForward localhost:1080\n"
        );
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Added(record));
    }

    #[test]
    fn save_rejects_duplicate_and_invalid() {
        let (_dir, mut manager) = manager_with("Host Prod\n  HostName h\n");
        let before = read(&manager);

        assert!(matches!(
            manager.save_connection(ConnectionRecord::new("prod")),
            Err(ConnectionError::DuplicateNickname(_))
        ));
        assert!(matches!(
            manager.save_connection(ConnectionRecord::new("web*")),
            Err(ConnectionError::Invalid(_))
        ));
        assert!(matches!(
            manager.save_connection(ConnectionRecord::new("my box")),
            Err(ConnectionError::MissingTarget(_))
        ));
        assert_eq!(read(&manager), before);
        assert_eq!(manager.connections().len(), 1);
    }

    #[test]
    fn update_in_place_keeps_neighbours() {
        let content = "Host A\n  HostName a\n\nHost B\n  HostName b\n\nHost C\n  HostName c\n";
        let (_dir, mut manager) = manager_with(content);
        let mut events = manager.subscribe();

        let mut b = manager.find_connection("B").unwrap().clone();
        b.port = 2222;
        manager.update_connection("B", b.clone()).unwrap();

        assert_eq!(
            read(&manager),
            "Host A\n  HostName a\n\nHost B\n    HostName b\n    Port 2222\n\nHost C\n  HostName c\n"
        );
        assert_eq!(manager.find_connection("B").unwrap().port, 2222);
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::Updated {
                previous_nickname: "B".to_string(),
                record: b
            }
        );
    }

    #[test]
    fn rename_replaces_block_and_moves_state() {
        let (_dir, mut manager) = manager_with("Host old\n  HostName h\n");
        manager.begin_connect("old").unwrap();

        let mut renamed = manager.find_connection("old").unwrap().clone();
        renamed.nickname = "new".to_string();
        manager.update_connection("old", renamed).unwrap();

        assert_eq!(read(&manager), "Host new\n    HostName h\n");
        assert!(manager.find_connection("old").is_none());
        assert_eq!(manager.connection_state("new"), ConnectionState::Connecting);

        manager.load().unwrap();
        assert_eq!(manager.connections().len(), 1);
    }

    #[test]
    fn rename_onto_existing_nickname_rejected() {
        let (_dir, mut manager) = manager_with("Host a\n  HostName h\nHost b\n  HostName h\n");
        let mut a = manager.find_connection("a").unwrap().clone();
        a.nickname = "B".to_string();
        assert!(matches!(
            manager.update_connection("a", a),
            Err(ConnectionError::DuplicateNickname(_))
        ));
    }

    #[test]
    fn aliases_count_as_taken_names() {
        let (_dir, mut manager) = manager_with("Host a b\n  HostName ha\n");
        let before = read(&manager);

        let mut b = ConnectionRecord::new("b");
        b.hostname = "hb".to_string();
        assert!(matches!(
            manager.save_connection(b),
            Err(ConnectionError::DuplicateNickname(_))
        ));

        let mut c = ConnectionRecord::new("c");
        c.aliases = vec!["A".to_string()];
        assert!(matches!(
            manager.save_connection(c),
            Err(ConnectionError::DuplicateNickname(_))
        ));
        assert_eq!(read(&manager), before);
    }

    #[test]
    fn block_shadowed_by_alias_is_skipped_and_edits_leave_owner_alone() {
        let (_dir, mut manager) =
            manager_with("Host a b\n  HostName ha\n\nHost b\n  HostName hb\n");
        assert_eq!(manager.connections().len(), 1);
        assert_eq!(manager.warnings().len(), 1);

        let mut a = manager.find_connection("a").unwrap().clone();
        a.port = 2222;
        manager.update_connection("a", a).unwrap();
        assert_eq!(
            read(&manager),
            "Host a b\n    HostName ha\n    Port 2222\n\nHost b\n  HostName hb\n"
        );
    }

    #[test]
    fn password_follows_host_and_user_changes() {
        let (_dir, mut manager) = manager_with("Host a\n  HostName old.example\n  User u\n");
        let pw = SecretString::from("pw".to_string());
        assert!(manager.set_connection_password("a", Some(&pw)).unwrap());

        let mut a = manager.find_connection("a").unwrap().clone();
        a.hostname = "new.example".to_string();
        a.username = Some("v".to_string());
        manager.update_connection("a", a).unwrap();

        assert!(manager.get_password("old.example", "u").is_none());
        assert_eq!(
            manager.get_password("new.example", "v").unwrap().expose_secret(),
            "pw"
        );

        assert!(manager.set_connection_password("a", None).unwrap());
        assert!(manager.get_password("new.example", "v").is_none());
    }

    #[test]
    fn search_filters_in_file_order() {
        let (_dir, manager) = manager_with(
            "Host web\n  HostName web.example\n\nHost db\n  HostName 10.1.0.7\n\nHost cache redis\n  HostName 10.1.0.9\n",
        );

        let nicknames = |query: &str| -> Vec<String> {
            manager
                .search(query)
                .into_iter()
                .map(|c| c.nickname.clone())
                .collect()
        };
        assert_eq!(nicknames(""), vec!["web", "db", "cache"]);
        assert_eq!(nicknames("10.1.0"), vec!["db", "cache"]);
        assert_eq!(nicknames("REDIS"), vec!["cache"]);
        assert_eq!(nicknames("EXAMPLE"), vec!["web"]);
        assert!(nicknames("nope").is_empty());
    }

    #[test]
    fn update_unknown_is_not_found() {
        let (_dir, mut manager) = manager_with("");
        assert!(matches!(
            manager.update_connection("ghost", ConnectionRecord::new("ghost")),
            Err(ConnectionError::NotFound(_))
        ));
    }

    #[test]
    fn remove_strips_block_and_password() {
        let (_dir, mut manager) =
            manager_with("Host a\n  HostName ha\n  User u\n\nHost b\n  HostName hb\n");
        let password = SecretString::from("pw".to_string());
        assert!(manager.store_password("ha", "u", &password));
        let mut events = manager.subscribe();

        let removed = manager.remove_connection("a").unwrap();
        assert_eq!(removed.nickname, "a");
        assert_eq!(read(&manager), "Host b\n  HostName hb\n");
        assert!(manager.get_password("ha", "u").is_none());
        assert!(matches!(events.try_recv().unwrap(), ConnectionEvent::Removed(_)));

        manager.load().unwrap();
        assert!(manager.find_connection("a").is_none());
    }

    #[test]
    fn secrets_round_trip_through_manager() {
        let (_dir, manager) = manager_with("Host a\n  HostName h\n  User u\n");
        let pass = SecretString::from("phrase".to_string());
        assert!(manager.store_key_passphrase("/k/id", &pass));
        assert_eq!(manager.get_key_passphrase("/k/id").unwrap().expose_secret(), "phrase");
        assert!(manager.delete_key_passphrase("/k/id"));
        assert!(!manager.delete_key_passphrase("/k/id"));

        let pw = SecretString::from("pw".to_string());
        assert!(manager.set_connection_password("a", Some(&pw)).unwrap());
        assert_eq!(manager.get_password("h", "u").unwrap().expose_secret(), "pw");
        assert!(manager.set_connection_password("a", None).unwrap());
        assert!(manager.get_password("h", "u").is_none());
    }

    #[test]
    fn secret_failures_degrade_softly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "Host a\n  HostName h\n").unwrap();
        let mut manager = ConnectionManager::new(&path, Box::new(FailingStore));
        manager.load().unwrap();

        let pw = SecretString::from("pw".to_string());
        assert!(!manager.store_password("h", "u", &pw));
        assert!(manager.get_password("h", "u").is_none());
        assert!(!manager.delete_password("h", "u"));
        assert!(manager.remove_connection("a").is_ok());
    }

    #[test]
    fn state_machine_and_events() {
        let (_dir, mut manager) = manager_with("Host a\n  HostName h\n");
        let mut events = manager.subscribe();

        assert_eq!(manager.connection_state("a"), ConnectionState::Unknown);
        assert!(matches!(
            manager.mark_connected("a"),
            Err(ConnectionError::InvalidTransition { .. })
        ));

        manager.begin_connect("a").unwrap();
        manager.mark_failed("a", "timeout").unwrap();
        assert_eq!(
            manager.connection_state("A"),
            ConnectionState::Failed("timeout".to_string())
        );
        manager.begin_connect("a").unwrap();
        manager.mark_connected("a").unwrap();
        manager.mark_disconnected("a").unwrap();

        let mut seen = Vec::new();
        while let Ok(ConnectionEvent::StatusChanged { state, .. }) = events.try_recv() {
            seen.push(state.name());
        }
        assert_eq!(
            seen,
            vec!["connecting", "failed", "connecting", "connected", "disconnected"]
        );
        assert!(matches!(
            manager.begin_connect("nobody"),
            Err(ConnectionError::NotFound(_))
        ));
    }

    #[test]
    fn profile_for_known_connection() {
        let (_dir, manager) = manager_with("Host a\n  HostName h\n  Port 2200\n");
        let profile = manager.profile("a").unwrap();
        assert_eq!(profile.host, "h");
        assert_eq!(profile.port, 2200);
        assert!(manager.profile("zzz").is_none());
    }
}
