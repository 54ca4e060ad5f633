//! Role configuration store.
//!
//! Binds a disk's hardware serial to the role it plays on the appliance.
//! The position of a serial inside its role list determines the disk's mount
//! path (`DiskShare0`, `DiskBackUp1`, ...), so lists are append-only: removing
//! an entry from the middle would move every later disk to a new path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store;

/// What a disk is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Backup,
    Share,
}

impl Role {
    /// Roles in the order reconciliation passes visit them.
    pub const PASS_ORDER: [Role; 2] = [Role::Share, Role::Backup];

    /// Directory name prefix of this role's mount paths.
    pub fn dir_prefix(self) -> &'static str {
        match self {
            Role::Backup => "DiskBackUp",
            Role::Share => "DiskShare",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Backup => f.write_str("backup"),
            Role::Share => f.write_str("share"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Accepts role names and the appliance's legacy numeric codes.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backup" | "1" => Ok(Role::Backup),
            "share" | "2" => Ok(Role::Share),
            _ => Err(Error::InvalidRole {
                value: s.to_string(),
            }),
        }
    }
}

/// Persisted role assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    #[serde(default)]
    pub backup_serials: Vec<String>,
    #[serde(default)]
    pub share_serials: Vec<String>,
}

impl RoleConfig {
    /// Returns the role bound to `serial`, if any.
    pub fn find_role(&self, serial: &str) -> Option<Role> {
        if self.backup_serials.iter().any(|s| s == serial) {
            Some(Role::Backup)
        } else if self.share_serials.iter().any(|s| s == serial) {
            Some(Role::Share)
        } else {
            None
        }
    }

    /// Serials assigned to `role`, in assignment order.
    pub fn serials(&self, role: Role) -> &[String] {
        match role {
            Role::Backup => &self.backup_serials,
            Role::Share => &self.share_serials,
        }
    }

    /// Position of `serial` within `role`'s list.
    pub fn index_of(&self, role: Role, serial: &str) -> Option<usize> {
        self.serials(role).iter().position(|s| s == serial)
    }

    /// Returns a copy with `serial` appended to `role`'s list.
    pub fn with_assignment(&self, serial: &str, role: Role) -> Result<Self> {
        if self.find_role(serial).is_some() {
            return Err(Error::DuplicateSerial {
                serial: serial.to_string(),
            });
        }

        let mut next = self.clone();
        match role {
            Role::Backup => next.backup_serials.push(serial.to_string()),
            Role::Share => next.share_serials.push(serial.to_string()),
        }
        Ok(next)
    }
}

/// Role configuration bound to its document on disk.
#[derive(Debug, Clone)]
pub struct RoleStore {
    path: PathBuf,
    config: RoleConfig,
}

impl RoleStore {
    /// Creates an empty store that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: RoleConfig::default(),
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
                warn!(path = %path.display(), error = %e, "starting with empty role configuration");
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RoleConfig {
        &self.config
    }

    pub fn find_role(&self, serial: &str) -> Option<Role> {
        self.config.find_role(serial)
    }

    pub fn serials(&self, role: Role) -> &[String] {
        self.config.serials(role)
    }

    /// Assigns `role` to `serial` and persists before returning.
    ///
    /// The in-memory state only changes once the document has been written.
    pub fn add_role(&mut self, serial: &str, role: Role) -> Result<()> {
        let next = self.config.with_assignment(serial, role)?;
        store::write_json(&self.path, &next)?;
        self.config = next;
        info!(serial, %role, "assigned disk role");
        Ok(())
    }
}
