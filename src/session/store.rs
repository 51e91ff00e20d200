//! Session files and timestamped backups under the configured session path.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::{debug, warn};

use crate::config::Config;

const EXTENSION: &str = "json";
const BACKUP_PREFIX: &str = "backup_";

#[derive(Debug, Clone)]
pub struct SessionFiles {
    length: usize,
    storage_path: PathBuf,
}

impl SessionFiles {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.session_path(), cfg.backup_length())
    }

    /// `backups` is how many backups to keep; older ones are pruned. The
    /// newest backup is always kept.
    pub fn new(storage_path: impl Into<PathBuf>, backups: usize) -> Result<Self> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path)
            .with_context(|| format!("creating session directory {}", storage_path.display()))?;
        Ok(Self {
            length: backups.max(1),
            storage_path,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.storage_path
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_control)
        {
            bail!("invalid session name {name:?}");
        }
        Ok(self.storage_path.join(format!("{name}.{EXTENSION}")))
    }

    // The backup prefix is reserved so named sessions are never listed or
    // pruned as backups.
    fn session_path(&self, name: &str) -> Result<PathBuf> {
        if name.starts_with(BACKUP_PREFIX) {
            bail!("session names may not start with {BACKUP_PREFIX:?}: {name:?}");
        }
        self.file_path(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.session_path(name).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> Result<String> {
        read_file(&self.session_path(name)?)
    }

    /// Replaces the named session atomically: readers see the old blob or the
    /// new one, never a torn write.
    pub fn write(&self, name: &str, blob: &str) -> Result<()> {
        self.write_file(&self.session_path(name)?, blob)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        remove_file(&self.session_path(name)?)
    }

    fn write_file(&self, p: &Path, blob: &str) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.storage_path)
            .context("creating temporary session file")?;
        tmp.write_all(blob.as_bytes())?;
        tmp.flush()?;
        tmp.persist(p)
            .with_context(|| format!("writing session {}", p.display()))?;
        debug!(path = %p.display(), bytes = blob.len(), "session written");
        Ok(())
    }

    /// Named sessions (backups excluded), oldest modification first.
    pub fn list(&self) -> Vec<String> {
        let mut files: Vec<(String, PathBuf)> = self
            .entries()
            .into_iter()
            .filter(|(name, _)| !name.starts_with(BACKUP_PREFIX))
            .collect();
        files.sort_by_key(|(_, p)| fs::metadata(p).and_then(|m| m.modified()).ok());
        files.into_iter().map(|(name, _)| name).collect()
    }

    /// Stores `blob` as a new backup and returns its key.
    pub fn backup(&self, blob: &str) -> Result<String> {
        let stamp = format!("{BACKUP_PREFIX}{}", Local::now().format("%Y%m%d_%H%M%S"));
        // Several backups within one second get increasing suffixes.
        let key = match self
            .list_backups()
            .iter()
            .map(|k| backup_order(k))
            .filter(|(s, _)| *s == stamp)
            .map(|(_, n)| n)
            .max()
        {
            Some(n) => format!("{stamp}_{}", n + 1),
            None => stamp,
        };
        self.write_file(&self.file_path(&key)?, blob)?;
        self.prune()?;
        Ok(key)
    }

    /// Backup keys, most recent first.
    pub fn list_backups(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with(BACKUP_PREFIX))
            .collect();
        keys.sort_by(|a, b| backup_order(b).cmp(&backup_order(a)));
        keys
    }

    pub fn read_backup(&self, key: &str) -> Result<String> {
        read_file(&self.backup_path(key)?)
    }

    pub fn delete_backup(&self, key: &str) -> Result<()> {
        remove_file(&self.backup_path(key)?)
    }

    fn backup_path(&self, key: &str) -> Result<PathBuf> {
        if !key.starts_with(BACKUP_PREFIX) {
            bail!("{key:?} is not a backup key");
        }
        self.file_path(key)
    }

    fn prune(&self) -> Result<()> {
        let backups = self.list_backups();
        for key in backups.iter().skip(self.length) {
            debug!(key = %key, "pruning old backup");
            let p = self.file_path(key)?;
            if let Err(err) = fs::remove_file(&p) {
                warn!(path = %p.display(), error = %err, "could not prune backup");
            }
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(String, PathBuf)> {
        let Ok(read_dir) = fs::read_dir(&self.storage_path) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == EXTENSION))
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?.to_string();
                Some((stem, p))
            })
            .collect()
    }
}

fn read_file(p: &Path) -> Result<String> {
    fs::read_to_string(p).with_context(|| format!("reading session {}", p.display()))
}

fn remove_file(p: &Path) -> Result<()> {
    fs::remove_file(p).with_context(|| format!("removing session {}", p.display()))
}

// Splits `backup_YYYYmmdd_HHMMSS[_N]` into its stamp and suffix.
fn backup_order(key: &str) -> (&str, u32) {
    const STAMP_LEN: usize = BACKUP_PREFIX.len() + "YYYYmmdd_HHMMSS".len();
    match (key.get(..STAMP_LEN), key.get(STAMP_LEN..)) {
        (Some(stamp), Some("")) => (stamp, 0),
        (Some(stamp), Some(rest)) => match rest.strip_prefix('_').and_then(|n| n.parse().ok()) {
            Some(n) => (stamp, n),
            None => (key, 0),
        },
        _ => (key, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 3).unwrap();
        files.write("work", "{}").unwrap();
        assert!(files.exists("work"));
        assert_eq!(files.read("work").unwrap(), "{}");
        files.write("work", "{\"a\":1}").unwrap();
        assert_eq!(files.read("work").unwrap(), "{\"a\":1}");
        assert_eq!(files.list(), vec!["work".to_string()]);
        files.remove("work").unwrap();
        assert!(!files.exists("work"));
    }

    #[test]
    fn names_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 3).unwrap();
        assert!(files.write("../evil", "{}").is_err());
        assert!(files.read(".hidden").is_err());
    }

    #[test]
    fn backups_are_pruned_to_length() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 2).unwrap();
        let keys: Vec<String> = (0..4).map(|i| files.backup(&i.to_string()).unwrap()).collect();
        let listed = files.list_backups();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|k| k.starts_with("backup_")));
        assert_eq!(&listed[0], keys.last().unwrap());
        assert!(files.list().is_empty());
    }

    #[test]
    fn session_names_cannot_use_the_backup_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 1).unwrap();
        assert!(files.write("backup_notes", "{}").is_err());
        assert!(files.read("backup_notes").is_err());
        assert!(files.remove("backup_notes").is_err());
        assert!(!files.exists("backup_notes"));

        files.write("notes_backup", "{}").unwrap();
        files.backup("{}").unwrap();
        files.backup("{}").unwrap();
        assert_eq!(files.list(), vec!["notes_backup".to_string()]);
        assert_eq!(files.list_backups().len(), 1);
    }

    #[test]
    fn zero_length_still_keeps_the_newest_backup() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 0).unwrap();
        let key = files.backup("{\"n\":1}").unwrap();
        assert_eq!(files.list_backups(), vec![key.clone()]);
        assert_eq!(files.read_backup(&key).unwrap(), "{\"n\":1}");
    }

    #[test]
    fn suffixes_sort_numerically() {
        let mut keys = vec![
            "backup_20240101_000000_10",
            "backup_20240101_000000_2",
            "backup_20240101_000000",
        ];
        keys.sort_by(|a, b| backup_order(b).cmp(&backup_order(a)));
        assert_eq!(keys[0], "backup_20240101_000000_10");
        assert_eq!(keys[2], "backup_20240101_000000");
    }

    #[test]
    fn read_backup_requires_backup_key() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), 2).unwrap();
        files.write("plain", "{}").unwrap();
        assert!(files.read_backup("plain").is_err());
        let key = files.backup("{\"b\":true}").unwrap();
        assert_eq!(files.read_backup(&key).unwrap(), "{\"b\":true}");
        files.delete_backup(&key).unwrap();
        assert!(files.list_backups().is_empty());
    }
}
