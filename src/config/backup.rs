//! Configuration backups.
//!
//! A backup is one JSON document holding the SSH config text, the
//! application settings and the group tree. Importing either replaces the
//! local copies or merges into them: hosts and groups are matched by name
//! (ignoring case) and only missing ones are added, so nothing already
//! present is overwritten.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::groups::{Group, GroupId, GroupStore};
use super::paths;
use super::settings::AppConfig;
use crate::error::BackupError;
use crate::ssh_config::SshConfig;
use crate::ssh_config::parser::block_spans;

/// Newest backup format this build reads and the one it writes
pub const BACKUP_VERSION: u32 = 1;

const AUTO_BACKUP_PREFIX: &str = "auto_backup_";
const IMPORTED_HEADER: &str = "# Imported entries\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Backup {
    pub version: u32,
    pub export_date: DateTime<Utc>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub ssh_config: String,
    #[serde(default)]
    pub settings: AppConfig,
    #[serde(default)]
    pub groups: GroupStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Overwrite the SSH config, settings and groups with the backup's
    #[default]
    Replace,
    /// Add hosts and groups the local copies do not have; keep local settings
    Merge,
}

impl ImportMode {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "replace" => Some(ImportMode::Replace),
            "merge" => Some(ImportMode::Merge),
            _ => None,
        }
    }
}

/// What an import changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Snapshot taken before anything was touched
    pub auto_backup: Option<PathBuf>,
    /// Nicknames written by the import
    pub added_hosts: Vec<String>,
    /// Group names written by the import
    pub added_groups: Vec<String>,
}

/// A backup file found in the backup directory
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Files a backup is taken from and restored to
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPaths {
    pub ssh_config: PathBuf,
    pub settings: PathBuf,
    pub groups: PathBuf,
    pub backup_dir: PathBuf,
}

impl BackupPaths {
    /// Application default locations, with `ssh_config` as the SSH config
    pub fn for_ssh_config(ssh_config: impl Into<PathBuf>) -> Option<Self> {
        Some(Self {
            ssh_config: ssh_config.into(),
            settings: paths::settings_file()?,
            groups: paths::groups_file()?,
            backup_dir: paths::backup_dir()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    paths: BackupPaths,
}

impl BackupManager {
    pub fn new(paths: BackupPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    /// Current state as a backup document. A missing SSH config exports as
    /// empty and missing settings export as defaults.
    pub fn snapshot(&self) -> Result<Backup, BackupError> {
        let ssh_config = match std::fs::read_to_string(&self.paths.ssh_config) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "SSH config not found at {}, exporting it empty",
                    self.paths.ssh_config.display()
                );
                String::new()
            }
            Err(source) => {
                return Err(BackupError::Read {
                    path: self.paths.ssh_config.clone(),
                    source,
                });
            }
        };

        let settings = if self.paths.settings.exists() {
            AppConfig::load_from(&self.paths.settings)?
        } else {
            tracing::warn!("Settings not found, exporting defaults");
            AppConfig::default()
        };

        Ok(Backup {
            version: BACKUP_VERSION,
            export_date: Utc::now(),
            platform: std::env::consts::OS.to_string(),
            ssh_config,
            settings,
            groups: GroupStore::load_from(&self.paths.groups)?,
        })
    }

    pub fn export_to(&self, path: &Path) -> Result<(), BackupError> {
        write_backup(path, &self.snapshot()?)?;
        tracing::info!("Configuration exported to {}", path.display());
        Ok(())
    }

    /// Export into the backup directory under a timestamped name
    pub fn create_auto_backup(&self) -> Result<PathBuf, BackupError> {
        let dir = &self.paths.backup_dir;
        paths::ensure_private_dir(dir).map_err(|source| BackupError::Write {
            path: dir.clone(),
            source,
        })?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = dir.join(format!("{}{}.json", AUTO_BACKUP_PREFIX, stamp));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}{}_{}.json", AUTO_BACKUP_PREFIX, stamp, n));
            n += 1;
        }

        self.export_to(&path)?;
        Ok(path)
    }

    /// Backups in the backup directory, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>, BackupError> {
        let dir = &self.paths.backup_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BackupError::Read {
                    path: dir.clone(),
                    source,
                });
            }
        };

        let mut backups: Vec<BackupEntry> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| {
                let meta = entry
                    .metadata()
                    .inspect_err(|e| {
                        tracing::warn!("Failed to stat backup {}: {}", entry.path().display(), e)
                    })
                    .ok()?;
                Some(BackupEntry {
                    path: entry.path(),
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                    modified: DateTime::<Utc>::from(meta.modified().ok()?),
                })
            })
            .collect();

        backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(backups)
    }

    /// Restore from `path`. The file is validated before anything is
    /// written; a failed automatic backup is logged and does not stop the
    /// import. Callers reload their connection and group managers afterwards.
    pub fn import_from(
        &self,
        path: &Path,
        mode: ImportMode,
        create_backup: bool,
    ) -> Result<ImportReport, BackupError> {
        let backup = read_backup(path)?;
        let mut report = ImportReport::default();

        if create_backup {
            match self.create_auto_backup() {
                Ok(saved) => {
                    tracing::info!("Created automatic backup at {}", saved.display());
                    report.auto_backup = Some(saved);
                }
                Err(e) => tracing::error!("Failed to create automatic backup: {}", e),
            }
        }

        match mode {
            ImportMode::Replace => self.import_replace(&backup, &mut report)?,
            ImportMode::Merge => self.import_merge(&backup, &mut report)?,
        }

        tracing::info!(
            "Imported {} ({:?}): {} hosts, {} groups",
            path.display(),
            mode,
            report.added_hosts.len(),
            report.added_groups.len()
        );
        Ok(report)
    }

    fn import_replace(&self, backup: &Backup, report: &mut ImportReport) -> Result<(), BackupError> {
        if !backup.ssh_config.is_empty() {
            write_private(&self.paths.ssh_config, &backup.ssh_config)?;
            report.added_hosts = host_names(&backup.ssh_config);
        }

        backup.settings.save_to(&self.paths.settings)?;

        let mut groups = backup.groups.clone();
        groups.normalize();
        groups.save_to(&self.paths.groups)?;
        report.added_groups = groups.groups.values().map(|g| g.name.clone()).collect();
        Ok(())
    }

    fn import_merge(&self, backup: &Backup, report: &mut ImportReport) -> Result<(), BackupError> {
        if !backup.ssh_config.is_empty() {
            let existing = match std::fs::read_to_string(&self.paths.ssh_config) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(source) => {
                    return Err(BackupError::Read {
                        path: self.paths.ssh_config.clone(),
                        source,
                    });
                }
            };
            let (merged, added) = merge_ssh_config(&existing, &backup.ssh_config);
            if !added.is_empty() {
                write_private(&self.paths.ssh_config, &merged)?;
            }
            report.added_hosts = added;
        }

        let mut groups = GroupStore::load_from(&self.paths.groups)?;
        let before = groups.clone();
        report.added_groups = merge_groups(&mut groups, &backup.groups);
        if groups != before {
            groups.save_to(&self.paths.groups)?;
        }
        Ok(())
    }
}

/// Read and validate a backup file
pub fn read_backup(path: &Path) -> Result<Backup, BackupError> {
    let content = std::fs::read_to_string(path).map_err(|source| BackupError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let backup: Backup = serde_json::from_str(&content).map_err(|source| BackupError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if backup.version == 0 || backup.version > BACKUP_VERSION {
        return Err(BackupError::UnsupportedVersion {
            found: backup.version,
            supported: BACKUP_VERSION,
        });
    }
    if backup.platform != std::env::consts::OS {
        tracing::warn!(
            "Backup was exported on '{}', importing on '{}'",
            backup.platform,
            std::env::consts::OS
        );
    }
    Ok(backup)
}

pub fn write_backup(path: &Path, backup: &Backup) -> Result<(), BackupError> {
    let content = serde_json::to_string_pretty(backup).map_err(BackupError::Serialize)?;
    write_private(path, &content)
}

/// Atomic write leaving the file readable by its owner only
fn write_private(path: &Path, content: &str) -> Result<(), BackupError> {
    let write_err = |source| BackupError::Write {
        path: path.to_path_buf(),
        source,
    };
    super::write_atomic(path, content).map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }
    Ok(())
}

/// Nicknames (first `Host` pattern) of every Host block in `content`
fn host_names(content: &str) -> Vec<String> {
    SshConfig::parse(content)
        .host_blocks()
        .filter_map(|b| b.patterns.first().cloned())
        .collect()
}

/// Append the Host blocks of `imported` whose nickname `existing` does not
/// already name, under an `# Imported entries` header. `Match` blocks are
/// not imported. Returns the new text and the nicknames added.
pub fn merge_ssh_config(existing: &str, imported: &str) -> (String, Vec<String>) {
    let mut known: HashSet<String> = SshConfig::parse(existing)
        .host_blocks()
        .flat_map(|b| b.patterns.iter().map(|p| p.to_lowercase()))
        .collect();

    let lines: Vec<&str> = imported.split_inclusive('\n').collect();
    let mut added = Vec::new();
    let mut blocks = Vec::new();

    for span in block_spans(&lines) {
        let Some(patterns) = span.patterns.as_ref() else {
            continue;
        };
        let Some(nickname) = patterns.first() else {
            continue;
        };
        if known.contains(&nickname.to_lowercase()) {
            tracing::debug!("Import skips existing host '{}'", nickname);
            continue;
        }
        known.extend(patterns.iter().map(|p| p.to_lowercase()));

        let mut text = lines[span.lines.start..span.body_end].concat();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        added.push(nickname.clone());
        blocks.push(text);
    }

    if blocks.is_empty() {
        return (existing.to_string(), added);
    }

    let mut out = existing.to_string();
    if !out.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        if !out.ends_with("\n\n") {
            out.push('\n');
        }
    }
    out.push_str(IMPORTED_HEADER);
    out.push_str(&blocks.join("\n"));
    (out, added)
}

/// Add the groups of `imported` that `current` has no group of the same
/// name for, under fresh ids, and place connections `current` does not
/// track yet. Returns the names of the added groups.
pub fn merge_groups(current: &mut GroupStore, imported: &GroupStore) -> Vec<String> {
    let mut by_name: HashMap<String, GroupId> = current
        .groups
        .values()
        .map(|g| (g.name.to_lowercase(), g.id))
        .collect();

    let mut incoming: Vec<&Group> = imported.groups.values().collect();
    incoming.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

    let mut id_map: HashMap<GroupId, GroupId> = HashMap::new();
    let mut fresh: HashSet<GroupId> = HashSet::new();
    let mut added = Vec::new();
    for group in &incoming {
        let key = group.name.to_lowercase();
        if let Some(existing) = by_name.get(&key) {
            id_map.insert(group.id, *existing);
            continue;
        }
        let id = Uuid::new_v4();
        id_map.insert(group.id, id);
        fresh.insert(id);
        by_name.insert(key, id);
        added.push(group.name.clone());
    }

    for group in &incoming {
        let Some(&id) = id_map.get(&group.id) else {
            continue;
        };
        if !fresh.contains(&id) {
            continue;
        }
        let parent_id = group.parent_id.and_then(|p| id_map.get(&p).copied());
        let order = current
            .groups
            .values()
            .filter(|g| g.parent_id == parent_id)
            .count() as i64;
        current.groups.insert(
            id,
            Group {
                id,
                parent_id,
                children: Vec::new(),
                connections: Vec::new(),
                order,
                ..(*group).clone()
            },
        );
    }

    let placements = incoming
        .iter()
        .flat_map(|g| {
            let target = id_map.get(&g.id).copied();
            g.connections.iter().map(move |n| (n, target))
        })
        .chain(imported.root_connections.iter().map(|n| (n, None)));
    for (nickname, target) in placements {
        if current.connections.contains_key(nickname) {
            continue;
        }
        current.connections.insert(nickname.clone(), target);
        match target.and_then(|id| current.groups.get_mut(&id)) {
            Some(group) => group.connections.push(nickname.clone()),
            None => current.root_connections.push(nickname.clone()),
        }
    }

    current.normalize();
    added
}
