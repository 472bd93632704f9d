//! `Include` resolution.
//!
//! Collects the main config file plus every file it pulls in, depth first,
//! in the order `ssh` would read them. Relative include paths resolve
//! against the main config's directory (`~/.ssh` for the user config), as
//! OpenSSH does; glob characters are honoured in the final path component.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::parser::SshConfig;
use super::pattern::glob_match;
use crate::config::paths::expand_tilde;

/// A config file and its text
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub content: String,
}

/// Read `main` and all files it includes. Unreadable included files are
/// skipped with a warning; each file is visited at most once.
pub fn load_config_sources(main: &Path) -> Vec<ConfigSource> {
    let mut visited = HashSet::new();
    let mut sources = Vec::new();
    let base_dir = main.parent().map(Path::to_path_buf).unwrap_or_default();
    collect(main, &base_dir, &mut visited, &mut sources);
    sources
}

fn collect(
    path: &Path,
    base_dir: &Path,
    visited: &mut HashSet<PathBuf>,
    sources: &mut Vec<ConfigSource>,
) {
    let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(key) {
        tracing::debug!("Include cycle or duplicate skipped: {}", path.display());
        return;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Skipping unreadable SSH config {}: {}", path.display(), e);
            return;
        }
    };

    let patterns = SshConfig::parse(&content).include_patterns();
    sources.push(ConfigSource {
        path: path.to_path_buf(),
        content,
    });

    for pattern in patterns {
        for included in expand_include(base_dir, &pattern) {
            collect(&included, base_dir, visited, sources);
        }
    }
}

/// Expand one `Include` argument into existing file paths, sorted
pub fn expand_include(base_dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let expanded = expand_tilde(pattern);
    let full = if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    };

    let Some(file_pattern) = full.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };

    if !file_pattern.contains('*') && !file_pattern.contains('?') {
        return if full.is_file() { vec![full] } else { Vec::new() };
    }

    let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| glob_match(&file_pattern, &e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn main_file_comes_first_then_includes_in_order() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("config");
        fs::create_dir(dir.path().join("config.d")).unwrap();
        fs::write(dir.path().join("config.d/b.conf"), "Host b\n").unwrap();
        fs::write(dir.path().join("config.d/a.conf"), "Host a\n").unwrap();
        fs::write(dir.path().join("config.d/ignored.txt"), "Host x\n").unwrap();
        fs::write(&main, "Include config.d/*.conf\nHost main\n").unwrap();

        let sources = load_config_sources(&main);
        let names: Vec<_> = sources
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["config", "a.conf", "b.conf"]);
    }

    #[test]
    fn include_cycles_terminate() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "Include b\nHost a\n").unwrap();
        fs::write(&b, "Include a\nHost b\n").unwrap();

        let sources = load_config_sources(&a);
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn nested_relative_includes_resolve_from_main_dir() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("config");
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(&main, "Include sub/first\n").unwrap();
        fs::write(dir.path().join("sub/first"), "Include second\nHost f\n").unwrap();
        fs::write(dir.path().join("second"), "Host s\n").unwrap();

        let sources = load_config_sources(&main);
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[2].path, dir.path().join("second"));
    }

    #[test]
    fn missing_main_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(load_config_sources(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn missing_include_is_skipped() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("config");
        fs::write(&main, "Include does-not-exist\nHost a\n").unwrap();
        assert_eq!(load_config_sources(&main).len(), 1);
    }

    #[test]
    fn absolute_include_path() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("other");
        fs::write(&other, "Host o\n").unwrap();
        let found = expand_include(Path::new("/nonexistent"), &other.to_string_lossy());
        assert_eq!(found, vec![other]);
    }
}
