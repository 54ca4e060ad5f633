//! Appliance settings.
//!
//! Read from a TOML file; every field has a default so a missing file or a
//! partial one is fine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::executor::{ExecutionContext, PrivilegeEscalation};

/// Default mount root for role disks.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/nas";

/// Default Samba configuration path.
pub const SMB_CONF_PATH: &str = "/etc/samba/smb.conf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory for `DiskShare<i>` / `DiskBackUp<i>`.
    pub mount_root: PathBuf,
    /// Role configuration document.
    pub role_config: PathBuf,
    /// Shared folder configuration document.
    pub share_config: PathBuf,
    /// Samba configuration file.
    pub smb_conf: PathBuf,
    /// How privileged commands are run.
    pub escalation: PrivilegeEscalation,
    /// Upper bound for each external command, unbounded when absent.
    pub command_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            role_config: state_dir.join("disks.json"),
            share_config: state_dir.join("shared-folders.json"),
            smb_conf: PathBuf::from(SMB_CONF_PATH),
            escalation: PrivilegeEscalation::None,
            command_timeout_secs: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("nasdisk")
}

/// Location of the settings file when none is given.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nasdisk").join("settings.toml"))
}

impl Settings {
    /// Loads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "settings file absent, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).config_read_context(path)?;
        Self::from_toml(path, &content)
    }

    fn from_toml(path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// The mount root as an absolute path.
    pub fn absolute_mount_root(&self) -> Result<PathBuf> {
        std::path::absolute(&self.mount_root).mount_point_context(&self.mount_root)
    }

    /// Builds the command runner these settings describe.
    pub fn execution_context(&self) -> ExecutionContext {
        let ctx = ExecutionContext::with_escalation(self.escalation);
        match self.command_timeout_secs {
            Some(secs) => ctx.timeout(Duration::from_secs(secs)),
            None => ctx,
        }
    }
}
