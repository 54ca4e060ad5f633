//! Mount orchestration.
//!
//! Mounts, unmounts and formats partitions, and runs the role-driven
//! reconciliation passes that bring every role disk to its derived mount
//! path `<mount root>/<RoleDir><index>`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::disk::{Partition, PhysicalDisk};
use crate::error::{Error, IoResultExt, Result, serialize_display};
use crate::executor::CommandRunner;
use crate::role::{Role, RoleConfig};

/// Derived mount path of the disk at `index` in `role`'s serial list.
///
/// External tools locate role disks by recomputing this path.
pub fn mount_path(mount_root: &Path, role: Role, index: usize) -> PathBuf {
    mount_root.join(format!("{}{}", role.dir_prefix(), index))
}

/// Creates a mount point directory if it doesn't exist.
pub fn create_mount_point(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).mount_point_context(path)?;
    }
    Ok(())
}

/// Result of a successful mount request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Mounted,
    AlreadyMounted,
}

/// Result of a successful unmount request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountState {
    Unmounted { from: PathBuf },
    NotMounted,
}

/// Filesystems this tool can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ext4,
    Exfat,
    Ntfs,
}

impl FsType {
    fn mkfs_program(self) -> &'static str {
        match self {
            FsType::Ext4 => "mkfs.ext4",
            FsType::Exfat => "mkfs.exfat",
            FsType::Ntfs => "mkfs.ntfs",
        }
    }

    /// Flags that keep mkfs non-interactive.
    fn batch_flags(self) -> &'static [&'static str] {
        match self {
            // -F: do not ask before overwriting an existing filesystem
            FsType::Ext4 => &["-F"],
            FsType::Exfat => &[],
            // -Q: skip zeroing the whole partition
            FsType::Ntfs => &["-Q"],
        }
    }

    fn mkfs_args<'a>(self, device: &'a str, label: Option<&'a str>) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.batch_flags().to_vec();
        if let Some(label) = label {
            args.push("-L");
            args.push(label);
        }
        args.push(device);
        args
    }
}

impl FromStr for FsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ext4" => Ok(FsType::Ext4),
            "exfat" => Ok(FsType::Exfat),
            "ntfs" => Ok(FsType::Ntfs),
            _ => Err(Error::UnsupportedFsType { fs: s.to_string() }),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsType::Ext4 => "ext4",
            FsType::Exfat => "exfat",
            FsType::Ntfs => "ntfs",
        };
        f.write_str(name)
    }
}

impl Partition {
    /// Mounts this partition at `target`, creating the directory if needed.
    ///
    /// Mounting at the current mount point is a no-op. A partition mounted
    /// anywhere else is refused rather than moved.
    pub fn mount(&self, runner: &dyn CommandRunner, target: &Path) -> Result<MountState> {
        if let Some(current) = &self.mount_point {
            if same_path(current, target) {
                debug!(device = %self.device_name, target = %target.display(), "already mounted");
                return Ok(MountState::AlreadyMounted);
            }
            return Err(Error::AlreadyMountedElsewhere {
                device: self.device_name.clone(),
                current: current.clone(),
                requested: target.to_path_buf(),
            });
        }

        create_mount_point(target)?;

        let device = self.device_path().to_string_lossy().into_owned();
        let target_str = target.to_string_lossy().into_owned();
        let output = runner.run("mount", &[device.as_str(), target_str.as_str()])?;

        if !output.success() {
            let stderr = output.stderr.trim().to_string();

            if is_dirty_volume_error(&stderr) {
                return Err(Error::DirtyVolume { device });
            }

            return Err(Error::Mount {
                device: self.device_name.clone(),
                target: target.to_path_buf(),
                message: stderr,
            });
        }

        info!(device = %self.device_name, target = %target.display(), "mounted partition");
        Ok(MountState::Mounted)
    }

    /// Unmounts this partition wherever it is mounted.
    ///
    /// When the inventory did not report a mount point, the live one is
    /// looked up with findmnt first. Unmounting an unmounted partition is a
    /// no-op.
    pub fn unmount(&self, runner: &dyn CommandRunner) -> Result<UnmountState> {
        let target = match &self.mount_point {
            Some(path) => path.clone(),
            None => match resolve_mount_point(runner, self)? {
                Some(path) => path,
                None => return Ok(UnmountState::NotMounted),
            },
        };

        let target_str = target.to_string_lossy().into_owned();
        let output = runner.run("umount", &[target_str.as_str()])?;
        if !output.success() {
            return Err(Error::Unmount {
                path: target.clone(),
                message: output.stderr.trim().to_string(),
            });
        }

        info!(device = %self.device_name, from = %target.display(), "unmounted partition");
        Ok(UnmountState::Unmounted { from: target })
    }

    /// Creates a new filesystem on this partition, destroying its contents.
    ///
    /// The filesystem type is checked before anything else happens. The
    /// partition is unmounted first; if that fails, mkfs is never run.
    pub fn format(&self, runner: &dyn CommandRunner, fs_type: &str, label: Option<&str>) -> Result<()> {
        let fs_type: FsType = fs_type.parse()?;

        self.unmount(runner).map_err(|source| Error::UnmountRequiredFailed {
            device: self.device_name.clone(),
            source: Box::new(source),
        })?;

        let device = self.device_path().to_string_lossy().into_owned();
        let program = fs_type.mkfs_program();
        let args = fs_type.mkfs_args(&device, label);

        warn!(device = %device, fs = %fs_type, "formatting partition");
        let output = match runner.run(program, &args) {
            Ok(output) => output,
            Err(e @ (Error::Timeout { .. } | Error::AuthenticationCancelled)) => return Err(e),
            Err(e) => {
                return Err(Error::FormatCommandFailed {
                    device: self.device_name.clone(),
                    message: e.to_string(),
                });
            }
        };

        if !output.success() {
            return Err(Error::FormatCommandFailed {
                device: self.device_name.clone(),
                message: output.stderr.trim().to_string(),
            });
        }

        info!(device = %device, fs = %fs_type, "formatted partition");
        Ok(())
    }
}

/// Looks up where a partition is mounted right now.
///
/// Returns `None` when findmnt reports no mount for the device.
pub fn resolve_mount_point(runner: &dyn CommandRunner, partition: &Partition) -> Result<Option<PathBuf>> {
    let device = partition.device_path().to_string_lossy().into_owned();

    let unresolvable = |message: String| Error::MountPointUnresolvable {
        device: partition.device_name.clone(),
        message,
    };

    let output = runner
        .run("findmnt", &["-n", "-o", "TARGET", "--source", device.as_str()])
        .map_err(|e| unresolvable(e.to_string()))?;

    let first_line = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(PathBuf::from);

    match (output.code, first_line) {
        (Some(0), Some(path)) => Ok(Some(path)),
        // findmnt exits 1 with no output when nothing matches
        (Some(0) | Some(1), None) => Ok(None),
        (code, _) => Err(unresolvable(format!(
            "findmnt exited with code {}: {}",
            code.unwrap_or(-1),
            output.stderr.trim()
        ))),
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Checks if an error message indicates a dirty NTFS volume.
fn is_dirty_volume_error(stderr: &str) -> bool {
    let dirty_indicators = [
        "volume is dirty",
        "Volume is dirty",
        "force flag is not set",
        "The disk contains an unclean file system",
    ];

    dirty_indicators
        .iter()
        .any(|indicator| stderr.contains(indicator))
}

/// Why a configured disk was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No disk with the serial is attached.
    DiskAbsent,
    /// The disk is attached but does not have exactly one partition.
    NotSinglePartition { partitions: usize },
}

/// What a pass did for one configured disk.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Mounted,
    AlreadyMounted,
    Unmounted,
    NotMounted,
    Skipped {
        reason: SkipReason,
    },
    Failed {
        #[serde(serialize_with = "serialize_display")]
        error: Error,
    },
}

/// Per-disk entry of a mount or unmount pass.
#[derive(Debug, Serialize)]
pub struct DiskReport {
    pub role: Role,
    /// Position of the serial in the role list.
    pub index: usize,
    pub serial: String,
    /// Path the partition was mounted at (mount) or unmounted from (unmount).
    pub mount_path: Option<PathBuf>,
    /// Kernel name of the partition acted on.
    pub device: Option<String>,
    pub outcome: Outcome,
}

impl DiskReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// Picks the partition to act on for `serial`.
fn select_partition<'a>(inventory: &'a [PhysicalDisk], serial: &str) -> std::result::Result<&'a Partition, SkipReason> {
    let mut first_match = None;
    for disk in inventory.iter().filter(|d| d.has_serial(serial)) {
        if let Some(partition) = disk.sole_partition() {
            return Ok(partition);
        }
        first_match.get_or_insert(disk);
    }
    Err(match first_match {
        Some(disk) => SkipReason::NotSinglePartition {
            partitions: disk.partitions.len(),
        },
        None => SkipReason::DiskAbsent,
    })
}

fn log_skip(role: Role, serial: &str, reason: SkipReason) {
    match reason {
        SkipReason::DiskAbsent => info!(%role, serial, "configured disk not attached, skipping"),
        SkipReason::NotSinglePartition { partitions } => {
            warn!(%role, serial, partitions, "disk is not single-partition, skipping")
        }
    }
}

/// Mounts every disk assigned to `role` at its derived path.
///
/// Best effort: a failing disk is reported and the pass moves on.
pub fn mount_role(
    runner: &dyn CommandRunner,
    inventory: &[PhysicalDisk],
    roles: &RoleConfig,
    mount_root: &Path,
    role: Role,
) -> Vec<DiskReport> {
    roles
        .serials(role)
        .iter()
        .enumerate()
        .map(|(index, serial)| {
            let target = mount_path(mount_root, role, index);
            let (device, outcome) = match select_partition(inventory, serial) {
                Err(reason) => {
                    log_skip(role, serial, reason);
                    (None, Outcome::Skipped { reason })
                }
                Ok(partition) => {
                    let outcome = match partition.mount(runner, &target) {
                        Ok(MountState::Mounted) => Outcome::Mounted,
                        Ok(MountState::AlreadyMounted) => Outcome::AlreadyMounted,
                        Err(error) => {
                            warn!(%role, serial = %serial, error = %error, "mount failed");
                            Outcome::Failed { error }
                        }
                    };
                    (Some(partition.device_name.clone()), outcome)
                }
            };
            DiskReport {
                role,
                index,
                serial: serial.clone(),
                mount_path: Some(target),
                device,
                outcome,
            }
        })
        .collect()
}

/// Mounts share disks, then backup disks.
pub fn mount_all(
    runner: &dyn CommandRunner,
    inventory: &[PhysicalDisk],
    roles: &RoleConfig,
    mount_root: &Path,
) -> Vec<DiskReport> {
    Role::PASS_ORDER
        .iter()
        .flat_map(|&role| mount_role(runner, inventory, roles, mount_root, role))
        .collect()
}

/// Unmounts every disk assigned to `role`.
pub fn unmount_role(
    runner: &dyn CommandRunner,
    inventory: &[PhysicalDisk],
    roles: &RoleConfig,
    role: Role,
) -> Vec<DiskReport> {
    roles
        .serials(role)
        .iter()
        .enumerate()
        .map(|(index, serial)| {
            let (device, mount_path, outcome) = match select_partition(inventory, serial) {
                Err(reason) => {
                    log_skip(role, serial, reason);
                    (None, None, Outcome::Skipped { reason })
                }
                Ok(partition) => {
                    let (mount_path, outcome) = match partition.unmount(runner) {
                        Ok(UnmountState::Unmounted { from }) => (Some(from), Outcome::Unmounted),
                        Ok(UnmountState::NotMounted) => (None, Outcome::NotMounted),
                        Err(error) => {
                            warn!(%role, serial = %serial, error = %error, "unmount failed");
                            (partition.mount_point.clone(), Outcome::Failed { error })
                        }
                    };
                    (Some(partition.device_name.clone()), mount_path, outcome)
                }
            };
            DiskReport {
                role,
                index,
                serial: serial.clone(),
                mount_path,
                device,
                outcome,
            }
        })
        .collect()
}

/// Unmounts share disks, then backup disks.
pub fn unmount_all(runner: &dyn CommandRunner, inventory: &[PhysicalDisk], roles: &RoleConfig) -> Vec<DiskReport> {
    Role::PASS_ORDER
        .iter()
        .flat_map(|&role| unmount_role(runner, inventory, roles, role))
        .collect()
}
