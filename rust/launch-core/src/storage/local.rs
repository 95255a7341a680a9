// rust/launch-core/src/storage/local.rs

//! Local cache directories and whole-file writes.
//!
//! Artifacts shared by all ranks of a run live directly under a base
//! directory (by default `~/.cache/dtr`). Writes replace the whole file in
//! one step, optionally through a temp file and a rename so that readers on
//! other processes never observe a truncated file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::config::StorageConfig;
use crate::env::EnvironmentView;
use crate::error::{LaunchError, Result};

/// Directory name under `~/.cache` used when no override is given.
pub const CACHE_DIR_NAME: &str = "dtr";

/// Resolved and created cache directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    base_dir: PathBuf,
    datasets_dir: PathBuf,
}

impl CacheDirs {
    /// Resolves the base and datasets directories and creates them.
    ///
    /// `storage.base_dir` wins, otherwise `$HOME/.cache/dtr`. The datasets
    /// directory defaults to `<base_dir>/datasets`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no base directory can be determined
    /// and a storage error if a directory cannot be created.
    pub fn resolve(config: &StorageConfig, env: &EnvironmentView) -> Result<Self> {
        let base_dir = match &config.base_dir {
            Some(dir) => dir.clone(),
            None => default_base_dir(env)?,
        };
        let datasets_dir = config
            .datasets_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("datasets"));

        create_dir(&base_dir)?;
        create_dir(&datasets_dir)?;

        Ok(Self {
            base_dir,
            datasets_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }
}

fn default_base_dir(env: &EnvironmentView) -> Result<PathBuf> {
    let home = env
        .get_non_empty("HOME")
        .or_else(|| env.get_non_empty("USERPROFILE"))
        .ok_or_else(|| {
            LaunchError::config("cannot locate a home directory; set DTR_BASE_DIR")
        })?;
    Ok(Path::new(home).join(".cache").join(CACHE_DIR_NAME))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        LaunchError::storage_with_source(path, "failed to create directory", e)
    })
}

/// Joins a caller-supplied relative file name onto `base`.
///
/// # Errors
///
/// Returns an invalid-argument error for empty names, absolute paths, and
/// names that climb out of `base` with `..`.
pub fn resolve_relative(base: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    if name.is_empty() {
        return Err(LaunchError::invalid_argument("file name must not be empty"));
    }
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain || relative.file_name().is_none() {
        return Err(LaunchError::invalid_argument(format!(
            "file name '{name}' must be a relative path inside the cache directory"
        )));
    }
    Ok(base.join(relative))
}

/// Writes `contents` to `path` with a single write call.
///
/// When `atomic` is set the data goes to `.<name>.tmp.<uuid>` in the same
/// directory first and is renamed onto `path`.
///
/// # Errors
///
/// Returns a storage error if any filesystem step fails. A failed atomic
/// write leaves `path` untouched and removes its temp file.
pub fn write_file(path: &Path, contents: &[u8], atomic: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                LaunchError::storage_with_source(parent, "failed to create parent directories", e)
            })?;
        }
    }

    if !atomic {
        return write_direct(path, contents);
    }

    let temp_path = temp_path_for(path);
    if let Err(e) = write_direct(&temp_path, contents) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    // Atomic rename
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LaunchError::storage_with_source(
            &temp_path,
            format!("failed to rename to {}", path.display()),
            e,
        )
    })
}

fn write_direct(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| LaunchError::storage_with_source(path, "failed to create file", e))?;

    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| LaunchError::storage_with_source(path, "failed to write file", e))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{name}.tmp.{}", uuid::Uuid::new_v4().simple());
    path.with_file_name(temp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_uses_override() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            base_dir: Some(temp.path().join("base")),
            ..Default::default()
        };

        let dirs = CacheDirs::resolve(&config, &EnvironmentView::default()).unwrap();

        assert_eq!(dirs.base_dir(), temp.path().join("base"));
        assert_eq!(dirs.datasets_dir(), temp.path().join("base/datasets"));
        assert!(dirs.base_dir().is_dir());
        assert!(dirs.datasets_dir().is_dir());
    }

    #[test]
    fn test_resolve_defaults_under_home() {
        let temp = TempDir::new().unwrap();
        let env = EnvironmentView::from_pairs([("HOME", temp.path().to_str().unwrap())]);

        let dirs = CacheDirs::resolve(&StorageConfig::default(), &env).unwrap();

        assert_eq!(dirs.base_dir(), temp.path().join(".cache/dtr"));
        assert!(dirs.base_dir().is_dir());
    }

    #[test]
    fn test_resolve_separate_datasets_dir() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            base_dir: Some(temp.path().join("base")),
            datasets_dir: Some(temp.path().join("elsewhere")),
            ..Default::default()
        };

        let dirs = CacheDirs::resolve(&config, &EnvironmentView::default()).unwrap();
        assert_eq!(dirs.datasets_dir(), temp.path().join("elsewhere"));
        assert!(dirs.datasets_dir().is_dir());
    }

    #[test]
    fn test_resolve_without_home_fails() {
        let result = CacheDirs::resolve(&StorageConfig::default(), &EnvironmentView::default());
        assert!(matches!(result, Err(LaunchError::Config { .. })));
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/cache");
        assert_eq!(
            resolve_relative(base, "a.txt").unwrap(),
            PathBuf::from("/cache/a.txt")
        );
        assert_eq!(
            resolve_relative(base, "tok/vocab.json").unwrap(),
            PathBuf::from("/cache/tok/vocab.json")
        );

        assert!(resolve_relative(base, "").is_err());
        assert!(resolve_relative(base, "../escape.txt").is_err());
        assert!(resolve_relative(base, "/etc/passwd").is_err());
        assert!(resolve_relative(base, ".").is_err());
    }

    #[test]
    fn test_write_file_atomic_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.txt");

        write_file(&path, b"hello", true).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_file_direct_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.txt");

        write_file(&path, b"a longer first version", false).unwrap();
        write_file(&path, b"short", false).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_write_file_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c.txt");

        write_file(&path, b"nested", true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"nested");
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path_for(Path::new("/cache/a.txt"));
        assert_eq!(temp.parent(), Some(Path::new("/cache")));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".a.txt.tmp."));
    }
}
