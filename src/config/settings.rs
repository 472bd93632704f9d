use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Application-wide settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub ui: UiSettings,
}

impl AppConfig {
    /// Load from the default location, creating default if not exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::paths::settings_file().ok_or_else(|| ConfigError::ReadFile {
            path: std::path::PathBuf::from("settings.toml"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine settings file path",
            ),
        })?;

        if !path.exists() {
            let config = Self::default();
            super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;
            config.save_to(&path)?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        super::write_atomic(path, &content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_sort_preset() -> String {
    super::sort::DEFAULT_SORT_PRESET.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshSettings {
    /// Alternative SSH client config file (defaults to ~/.ssh/config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    /// Store passwords and key passphrases in the OS keyring
    #[serde(default = "default_true")]
    pub use_secret_storage: bool,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            use_secret_storage: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiSettings {
    /// Sort preset applied by "sort connections" (see `config::sort`)
    #[serde(default = "default_sort_preset")]
    pub sort_preset: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            sort_preset: default_sort_preset(),
        }
    }
}
