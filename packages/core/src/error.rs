//! Unified error types for the nasdisk-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Command did not finish within the configured bound.
    #[snafu(display("command '{command}' timed out after {secs}s"))]
    Timeout { command: String, secs: u64 },

    /// User cancelled authentication dialog.
    #[snafu(display("authentication cancelled by user"))]
    AuthenticationCancelled,

    /// The device inventory could not be queried or parsed.
    #[snafu(display("device query failed: {message}"))]
    DeviceQueryFailed { message: String },

    /// No partition with the given kernel name is currently present.
    #[snafu(display("no partition named {device} is present"))]
    DeviceNotFound { device: String },

    /// Failed to read a configuration document.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a configuration document.
    #[snafu(display("failed to write configuration at {}", path.display()))]
    ConfigWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration document exists but could not be decoded.
    #[snafu(display("failed to parse configuration at {}: {message}", path.display()))]
    ConfigParse { path: PathBuf, message: String },

    /// Role value is neither backup nor share.
    #[snafu(display("invalid disk role '{value}', expected 'backup' or 'share'"))]
    InvalidRole { value: String },

    /// The serial already has a role assigned.
    #[snafu(display("disk with serial {serial} is already assigned to a role"))]
    DuplicateSerial { serial: String },

    /// Backup frequency code outside 0..=3.
    #[snafu(display("invalid backup frequency '{value}'"))]
    InvalidBackupFrequency { value: String },

    /// Folder name cannot be used as a directory and section name.
    #[snafu(display("invalid shared folder name '{name}'"))]
    InvalidFolderName { name: String },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount operation failed.
    #[snafu(display("failed to mount {device} at {}: {message}", target.display()))]
    Mount {
        device: String,
        target: PathBuf,
        message: String,
    },

    /// Partition is mounted somewhere other than the requested target.
    #[snafu(display(
        "{device} is already mounted at {}, refusing to mount at {}",
        current.display(),
        requested.display()
    ))]
    AlreadyMountedElsewhere {
        device: String,
        current: PathBuf,
        requested: PathBuf,
    },

    /// Unmount operation failed.
    #[snafu(display("failed to unmount {}: {message}", path.display()))]
    Unmount { path: PathBuf, message: String },

    /// The live mount point of a device could not be determined.
    #[snafu(display("could not resolve mount point of {device}: {message}"))]
    MountPointUnresolvable { device: String, message: String },

    /// Device has a dirty NTFS volume.
    #[snafu(display("device {device} has a dirty NTFS volume"))]
    DirtyVolume { device: String },

    /// Requested filesystem cannot be created by this tool.
    #[snafu(display("unsupported filesystem type '{fs}', expected ext4, exfat or ntfs"))]
    UnsupportedFsType { fs: String },

    /// Format aborted because the partition could not be unmounted first.
    #[snafu(display("refusing to format {device}: unmount failed"))]
    UnmountRequiredFailed {
        device: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// mkfs ran but failed.
    #[snafu(display("formatting {device} failed: {message}"))]
    FormatCommandFailed { device: String, message: String },

    /// A shared folder names a user missing from the share user database.
    #[snafu(display("shared folder '{folder}' references unknown user '{user}'"))]
    UnknownUser { folder: String, user: String },

    /// Failed to read the share server configuration.
    #[snafu(display("failed to read share configuration at {}", path.display()))]
    SmbConfRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the share server configuration.
    #[snafu(display("failed to write share configuration at {}", path.display()))]
    SmbConfWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create backup.
    #[snafu(display("failed to create backup at {}", path.display()))]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The share server could not be queried or reloaded.
    #[snafu(display("share backend unavailable: {message}"))]
    ShareBackendUnavailable { message: String },

    /// Systemd operation failed.
    #[snafu(display("systemd operation failed: {message}"))]
    Systemd { message: String },

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

/// Serializes an error as its display text, for reports printed as JSON.
pub(crate) fn serialize_display<S>(error: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(error)
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for configuration read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for configuration write errors.
    fn config_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for smb.conf read errors.
    fn smb_conf_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for smb.conf write errors.
    fn smb_conf_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for backup errors.
    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }

    fn config_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigWriteSnafu { path: path.into() })
    }

    fn smb_conf_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(SmbConfReadSnafu { path: path.into() })
    }

    fn smb_conf_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(SmbConfWriteSnafu { path: path.into() })
    }

    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BackupSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}
