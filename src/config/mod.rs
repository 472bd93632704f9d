pub mod backup;
pub mod groups;
pub mod paths;
pub mod settings;
pub mod sort;

pub use backup::{Backup, BackupManager, BackupPaths, ImportMode, ImportReport};
pub use groups::{Group, GroupId, GroupManager, GroupNode, GroupStore, Position};
pub use settings::AppConfig;
pub use sort::{SortPreset, apply_connection_sort};

use std::io::Write;
use std::path::{Path, PathBuf};

/// The file a write to `path` should land in. A symlink is followed to its
/// target so the link itself survives; a dangling link resolves to where it
/// points.
fn write_target(path: &Path) -> std::io::Result<PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match std::fs::canonicalize(path) {
            Ok(real) => Ok(real),
            Err(_) => {
                let link = std::fs::read_link(path)?;
                Ok(match path.parent() {
                    Some(parent) if link.is_relative() => parent.join(link),
                    _ => link,
                })
            }
        },
        _ => Ok(path.to_path_buf()),
    }
}

/// Write `content` to `path` by writing a sibling temp file and renaming it
/// over the target, so readers never observe a half-written file. When
/// `path` is a symlink the temp file is created next to the link's target.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let target = write_target(path)?;
    let path = target.as_path();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    // Keep the permissions of the file being replaced (~/.ssh/config is
    // usually 0600 and ssh refuses group/world writable configs).
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(&tmp_path, meta.permissions())?;
    }

    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}
