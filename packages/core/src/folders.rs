//! Shared folder configuration store.
//!
//! Each shared folder lives on a share-role disk and becomes one network
//! export. The store is keyed by folder name.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store;

/// How often an external scheduler should back a folder up.
///
/// Stored as its integer code (0 = none ... 3 = monthly).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BackupFrequency {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl TryFrom<u8> for BackupFrequency {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(BackupFrequency::None),
            1 => Ok(BackupFrequency::Daily),
            2 => Ok(BackupFrequency::Weekly),
            3 => Ok(BackupFrequency::Monthly),
            _ => Err(Error::InvalidBackupFrequency {
                value: code.to_string(),
            }),
        }
    }
}

impl From<BackupFrequency> for u8 {
    fn from(freq: BackupFrequency) -> u8 {
        match freq {
            BackupFrequency::None => 0,
            BackupFrequency::Daily => 1,
            BackupFrequency::Weekly => 2,
            BackupFrequency::Monthly => 3,
        }
    }
}

impl FromStr for BackupFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackupFrequency::None),
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            "monthly" => Ok(BackupFrequency::Monthly),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::InvalidBackupFrequency {
                    value: s.to_string(),
                })
                .and_then(BackupFrequency::try_from),
        }
    }
}

impl fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupFrequency::None => "none",
            BackupFrequency::Daily => "daily",
            BackupFrequency::Weekly => "weekly",
            BackupFrequency::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// A logical shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFolder {
    /// Folder name; also the export name and the directory on the disk.
    pub folder: String,
    /// Serial of the share disk holding the folder.
    pub main_disk_serial: String,
    /// Serial of the disk the folder is backed up to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_disk_serial: Option<String>,
    #[serde(default, rename = "usersRW")]
    pub users_rw: BTreeSet<String>,
    #[serde(default, rename = "usersR")]
    pub users_r: BTreeSet<String>,
    #[serde(default)]
    pub backup_frequency: BackupFrequency,
}

impl SharedFolder {
    pub fn new(folder: impl Into<String>, main_disk_serial: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            main_disk_serial: main_disk_serial.into(),
            backup_disk_serial: None,
            users_rw: BTreeSet::new(),
            users_r: BTreeSet::new(),
            backup_frequency: BackupFrequency::None,
        }
    }

    /// Every user named by this folder, read-write and read-only.
    pub fn all_users(&self) -> impl Iterator<Item = &str> {
        self.users_rw
            .iter()
            .chain(self.users_r.iter())
            .map(String::as_str)
    }
}

/// Rejects names that cannot serve as both a directory and an export section.
pub fn validate_folder_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name != name.trim()
        || name == "."
        || name == ".."
        || name.eq_ignore_ascii_case("global")
        || name.contains(['/', '[', ']', '\n']);
    if bad {
        return Err(Error::InvalidFolderName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Persisted shared folder list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareConfig {
    #[serde(default, rename = "sharedFolders")]
    pub folders: Vec<SharedFolder>,
}

impl ShareConfig {
    pub fn get(&self, name: &str) -> Option<&SharedFolder> {
        self.folders.iter().find(|f| f.folder == name)
    }
}

/// Shared folder configuration bound to its document on disk.
#[derive(Debug, Clone)]
pub struct ShareStore {
    path: PathBuf,
    config: ShareConfig,
}

impl ShareStore {
    /// Creates an empty store that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: ShareConfig::default(),
        }
    }

    /// Loads the store from `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = store::read_json(&path)?;
        Ok(Self { path, config })
    }

    /// Loads the store, starting empty if the document is missing or unreadable.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "starting with empty shared folder configuration");
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn folders(&self) -> &[SharedFolder] {
        &self.config.folders
    }

    pub fn get(&self, name: &str) -> Option<&SharedFolder> {
        self.config.get(name)
    }

    /// Adds or replaces the folder with the same name, then persists.
    pub fn upsert(&mut self, folder: SharedFolder) -> Result<()> {
        validate_folder_name(&folder.folder)?;

        let mut next = self.config.clone();
        next.folders.retain(|f| f.folder != folder.folder);
        let name = folder.folder.clone();
        next.folders.push(folder);

        self.commit(next)?;
        info!(folder = %name, "saved shared folder");
        Ok(())
    }

    /// Removes the folder named `name`. Returns whether one was removed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        self.remove_where(|f| f.folder == name)
    }

    /// Removes the first folder equal to `folder`. Returns whether one was removed.
    pub fn remove_value(&mut self, folder: &SharedFolder) -> Result<bool> {
        self.remove_where(|f| f == folder)
    }

    fn remove_where(&mut self, pred: impl Fn(&SharedFolder) -> bool) -> Result<bool> {
        let Some(pos) = self.config.folders.iter().position(pred) else {
            return Ok(false);
        };

        let mut next = self.config.clone();
        let removed = next.folders.remove(pos);
        self.commit(next)?;
        info!(folder = %removed.folder, "removed shared folder");
        Ok(true)
    }

    fn commit(&mut self, next: ShareConfig) -> Result<()> {
        store::write_json(&self.path, &next)?;
        self.config = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn media() -> SharedFolder {
        let mut folder = SharedFolder::new("media", "SN-AAA");
        folder.users_rw.insert("alice".to_string());
        folder.users_r.insert("bob".to_string());
        folder.backup_frequency = BackupFrequency::Weekly;
        folder
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let dir = TempDir::new().unwrap();
        let mut store = ShareStore::empty(dir.path().join("folders.json"));

        store.upsert(media()).unwrap();
        store.upsert(SharedFolder::new("docs", "SN-AAA")).unwrap();

        let mut updated = media();
        updated.users_rw.insert("carol".to_string());
        store.upsert(updated.clone()).unwrap();

        assert_eq!(store.folders().len(), 2);
        // replaced entries move to the end
        assert_eq!(store.folders()[1], updated);
        assert_eq!(store.get("media").unwrap().users_rw.len(), 2);
    }

    #[test]
    fn test_remove_by_name_and_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folders.json");
        let mut store = ShareStore::empty(&path);
        store.upsert(media()).unwrap();
        store.upsert(SharedFolder::new("docs", "SN-AAA")).unwrap();

        assert!(!store.remove("missing").unwrap());
        assert!(store.remove("docs").unwrap());

        let mut different = media();
        different.backup_frequency = BackupFrequency::Daily;
        assert!(!store.remove_value(&different).unwrap());
        assert!(store.remove_value(&media()).unwrap());

        assert!(ShareStore::load(&path).unwrap().folders().is_empty());
    }

    #[test]
    fn test_document_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folders.json");
        let mut store = ShareStore::empty(&path);
        store.upsert(media()).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw["sharedFolders"][0];
        assert_eq!(entry["folder"], "media");
        assert_eq!(entry["mainDiskSerial"], "SN-AAA");
        assert_eq!(entry["usersRW"][0], "alice");
        assert_eq!(entry["usersR"][0], "bob");
        assert_eq!(entry["backupFrequency"], 2);
    }

    #[test]
    fn test_out_of_range_frequency_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folders.json");
        fs::write(
            &path,
            r#"{"sharedFolders":[{"folder":"x","mainDiskSerial":"S","backupFrequency":7}]}"#,
        )
        .unwrap();

        assert!(matches!(
            ShareStore::load(&path).unwrap_err(),
            Error::ConfigParse { .. }
        ));
    }

    #[test]
    fn test_folder_name_validation() {
        let dir = TempDir::new().unwrap();
        let mut store = ShareStore::empty(dir.path().join("folders.json"));

        for name in ["", " media", "a/b", "[x]", "..", "global"] {
            let err = store.upsert(SharedFolder::new(name, "SN")).unwrap_err();
            assert!(matches!(err, Error::InvalidFolderName { .. }), "{name}");
        }
        assert!(store.folders().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_backup_frequency_parsing() {
        assert_eq!("weekly".parse::<BackupFrequency>().unwrap(), BackupFrequency::Weekly);
        assert_eq!("3".parse::<BackupFrequency>().unwrap(), BackupFrequency::Monthly);
        assert!("hourly".parse::<BackupFrequency>().is_err());
        assert!("4".parse::<BackupFrequency>().is_err());
    }
}
