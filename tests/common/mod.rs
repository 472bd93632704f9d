//! Common test utilities

#![allow(dead_code)]

use std::path::PathBuf;
use tempfile::TempDir;

use sshpilot::config::BackupPaths;
use sshpilot::connection::ConnectionManager;
use sshpilot::secrets::MemoryStore;

/// Test environment with isolated SSH and application config directories
pub struct TestEnvironment {
    pub root: TempDir,
    pub ssh_config_path: PathBuf,
    pub groups_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let ssh_config_path = root.path().join(".ssh").join("config");
        let groups_path = root.path().join("sshpilot").join("groups.json");
        Self {
            root,
            ssh_config_path,
            groups_path,
        }
    }

    /// Environment whose SSH config starts with `content`
    pub fn with_ssh_config(content: &str) -> Self {
        let env = Self::new();
        env.write_ssh_config(content);
        env
    }

    pub fn write_ssh_config(&self, content: &str) {
        if let Some(parent) = self.ssh_config_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create .ssh dir");
        }
        std::fs::write(&self.ssh_config_path, content).expect("Failed to write SSH config");
    }

    pub fn read_ssh_config(&self) -> String {
        std::fs::read_to_string(&self.ssh_config_path).expect("Failed to read SSH config")
    }

    /// Backup locations inside this environment
    pub fn backup_paths(&self) -> BackupPaths {
        let app = self.root.path().join("sshpilot");
        BackupPaths {
            ssh_config: self.ssh_config_path.clone(),
            settings: app.join("settings.toml"),
            groups: self.groups_path.clone(),
            backup_dir: app.join("backups"),
        }
    }

    /// A loaded manager over this environment's config with in-memory secrets
    pub fn manager(&self) -> ConnectionManager {
        let mut manager =
            ConnectionManager::new(&self.ssh_config_path, Box::new(MemoryStore::new()));
        manager.load().expect("Failed to load SSH config");
        manager
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
