//! Disk inventory using lsblk, udevadm and df.
//!
//! Produces a fresh snapshot of the physical disks attached to the system,
//! with their partitions and live mount state. Nothing here is persisted or
//! mutates the system; call it as often as needed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::CommandRunner;

/// A partition of a physical disk, as seen by the last inventory query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Kernel device name (e.g., "sda1"). Changes across boots.
    pub device_name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Bytes used on the mounted filesystem; 0 when unmounted.
    pub used_bytes: u64,
    /// Current mount point, if mounted.
    pub mount_point: Option<PathBuf>,
    /// Filesystem type (e.g., "ext4", "exfat"), if any.
    pub fs_type: Option<String>,
}

impl Partition {
    /// Full device path (e.g., "/dev/sda1").
    pub fn device_path(&self) -> PathBuf {
        device_path(&self.device_name)
    }

    /// Returns true if this partition is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }
}

/// A physical disk with its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalDisk {
    /// Kernel device name (e.g., "sda", "mmcblk0"). Not a stable key.
    pub device_name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Device model, if reported.
    pub model: Option<String>,
    /// Hardware serial. `None` when it could not be determined; such a disk
    /// never matches a role assignment.
    pub serial: Option<String>,
    /// Partitions in the order lsblk lists them.
    pub partitions: Vec<Partition>,
}

impl PhysicalDisk {
    /// Returns true if this disk's hardware identity is `serial`.
    pub fn has_serial(&self, serial: &str) -> bool {
        self.serial.as_deref() == Some(serial)
    }

    /// The partition used for role-based mounting.
    ///
    /// Only disks with exactly one partition are eligible.
    pub fn sole_partition(&self) -> Option<&Partition> {
        match self.partitions.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

fn device_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/{}", name))
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

/// Lists all physical disks on the system.
///
/// Calls `lsblk --json --bytes`, then resolves each disk's serial through
/// udevadm and each mounted partition's usage through df.
pub fn list_disks(runner: &dyn CommandRunner) -> Result<Vec<PhysicalDisk>> {
    let output = runner.run(
        "lsblk",
        &[
            "--json",
            "--bytes",
            "--output",
            "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,MODEL,SERIAL",
        ],
    )?;

    if !output.success() {
        return Err(Error::DeviceQueryFailed {
            message: format!(
                "lsblk exited with code {}: {}",
                output.code.unwrap_or(-1),
                output.stderr.trim()
            ),
        });
    }

    let lsblk_output = parse_lsblk(&output.stdout)?;

    let mut disks = Vec::new();
    for dev in lsblk_output
        .blockdevices
        .iter()
        .filter(|d| d.device_type.as_deref() == Some("disk"))
    {
        let partitions = dev
            .children
            .iter()
            .flatten()
            .filter(|c| matches!(c.device_type.as_deref(), Some("part") | None))
            .map(|part| {
                let mount_point = part
                    .mountpoint
                    .as_deref()
                    .filter(|m| !m.is_empty())
                    .map(PathBuf::from);
                let used_bytes = match &mount_point {
                    Some(path) if path.is_absolute() => query_used_bytes(runner, path),
                    _ => 0,
                };
                Partition {
                    device_name: part.name.clone(),
                    size_bytes: part.size.unwrap_or(0),
                    used_bytes,
                    mount_point,
                    fs_type: part.fstype.clone(),
                }
            })
            .collect();

        let serial = read_udev_serial(runner, &dev.name).or_else(|| non_blank(&dev.serial));
        if serial.is_none() {
            warn!(device = %dev.name, "could not determine disk serial");
        }

        disks.push(PhysicalDisk {
            device_name: dev.name.clone(),
            size_bytes: dev.size.unwrap_or(0),
            model: non_blank(&dev.model).or_else(|| read_sysfs_model(&dev.name)),
            serial,
            partitions,
        });
    }

    debug!(count = disks.len(), "listed disks");
    Ok(disks)
}

fn parse_lsblk(json: &str) -> Result<LsblkOutput> {
    serde_json::from_str(json).map_err(|e| Error::DeviceQueryFailed {
        message: format!("failed to parse lsblk output: {}", e),
    })
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Reads the serial of a disk from its udev properties.
fn read_udev_serial(runner: &dyn CommandRunner, device_name: &str) -> Option<String> {
    let name_arg = format!("--name={}", device_path(device_name).display());
    match runner.run("udevadm", &["info", "--query=property", name_arg.as_str()]) {
        Ok(output) if output.success() => parse_udev_serial(&output.stdout),
        Ok(output) => {
            debug!(device = device_name, stderr = %output.stderr.trim(), "udevadm failed");
            None
        }
        Err(e) => {
            debug!(device = device_name, error = %e, "udevadm unavailable");
            None
        }
    }
}

/// Extracts the serial from `udevadm info --query=property` output.
///
/// `ID_SERIAL` is usually `Vendor_Model_Serial`; everything after the
/// second underscore is the serial. Values without that shape are used whole.
pub fn parse_udev_serial(properties: &str) -> Option<String> {
    let value = properties
        .lines()
        .find_map(|line| line.strip_prefix("ID_SERIAL="))?
        .trim();

    if value.is_empty() {
        return None;
    }

    let parts: Vec<&str> = value.split('_').collect();
    if parts.len() >= 3 {
        Some(parts[2..].join("_"))
    } else {
        Some(value.to_string())
    }
}

fn read_sysfs_model(device_name: &str) -> Option<String> {
    let base = Path::new("/sys/block").join(device_name).join("device");
    ["model", "name"]
        .iter()
        .filter_map(|file| fs::read_to_string(base.join(file)).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Bytes used on the filesystem mounted at `mount_point`, 0 if df fails.
fn query_used_bytes(runner: &dyn CommandRunner, mount_point: &Path) -> u64 {
    let target = mount_point.to_string_lossy().into_owned();
    match runner.run_checked("df", &["--output=used", "-B1", target.as_str()]) {
        Ok(output) => parse_df_used(&output.stdout).unwrap_or(0),
        Err(e) => {
            warn!(mount_point = %target, error = %e, "df failed");
            0
        }
    }
}

/// Parses `df --output=used -B1` output: a header line then the value.
fn parse_df_used(output: &str) -> Option<u64> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .nth(1)
        .and_then(|l| l.trim().parse().ok())
}

/// Finds the first disk whose serial is `serial`.
pub fn find_disk_by_serial<'a>(disks: &'a [PhysicalDisk], serial: &str) -> Option<&'a PhysicalDisk> {
    disks.iter().find(|d| d.has_serial(serial))
}

/// Finds a partition by kernel device name, with or without a `/dev/` prefix.
pub fn find_partition<'a>(disks: &'a [PhysicalDisk], device_name: &str) -> Option<&'a Partition> {
    let name = device_name.strip_prefix("/dev/").unwrap_or(device_name);
    disks
        .iter()
        .flat_map(|d| d.partitions.iter())
        .find(|p| p.device_name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    const SAMPLE_LSBLK_JSON: &str = r#"{
        "blockdevices": [
            {
                "name": "mmcblk0",
                "size": 31914983424,
                "type": "disk",
                "mountpoint": null,
                "fstype": null,
                "model": null,
                "serial": "0x1234abcd",
                "children": [
                    {"name": "mmcblk0p1", "size": 268435456, "type": "part", "mountpoint": "/boot/firmware", "fstype": "vfat"},
                    {"name": "mmcblk0p2", "size": 31641829376, "type": "part", "mountpoint": "/", "fstype": "ext4"}
                ]
            },
            {
                "name": "sda",
                "size": 1000204886016,
                "type": "disk",
                "mountpoint": null,
                "fstype": null,
                "model": "Portable SSD T7  ",
                "serial": "S5SXNG0R",
                "children": [
                    {"name": "sda1", "size": 1000203837440, "type": "part", "mountpoint": "/mnt/nas/DiskShare0", "fstype": "ext4"}
                ]
            },
            {
                "name": "sdb",
                "size": 500107862016,
                "type": "disk",
                "mountpoint": null,
                "fstype": null,
                "model": "Elements",
                "serial": null
            },
            {"name": "zram0", "size": 536870912, "type": "disk", "mountpoint": "[SWAP]"},
            {"name": "loop0", "size": 4096, "type": "loop", "mountpoint": null}
        ]
    }"#;

    const SDA_UDEV: &str = "DEVNAME=/dev/sda\nID_MODEL=Portable_SSD_T7\nID_SERIAL=Samsung_Portable_SSD_T7_S5SXNG0R\nID_SERIAL_SHORT=S5SXNG0R\n";

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .on_ok("lsblk", SAMPLE_LSBLK_JSON)
            .on_ok("udevadm info --query=property --name=/dev/sda", SDA_UDEV)
            .on_fail("udevadm", 1, "Unknown device")
            .on_ok("df --output=used -B1 /mnt/nas/DiskShare0", "     Used\n123456789\n")
            .on_ok("df", "Used\n42\n")
    }

    #[test]
    fn test_list_disks_builds_inventory() {
        let runner = scripted();
        let disks = list_disks(&runner).unwrap();

        // loop devices are not disks
        assert_eq!(disks.len(), 4);

        let sda = disks.iter().find(|d| d.device_name == "sda").unwrap();
        assert_eq!(sda.serial.as_deref(), Some("SSD_T7_S5SXNG0R"));
        assert_eq!(sda.model.as_deref(), Some("Portable SSD T7"));
        assert_eq!(sda.partitions.len(), 1);
        let part = sda.sole_partition().unwrap();
        assert_eq!(part.mount_point, Some(PathBuf::from("/mnt/nas/DiskShare0")));
        assert_eq!(part.used_bytes, 123456789);
        assert_eq!(part.device_path(), PathBuf::from("/dev/sda1"));

        // udevadm failed, lsblk SERIAL is the fallback
        let sd = disks.iter().find(|d| d.device_name == "mmcblk0").unwrap();
        assert_eq!(sd.serial.as_deref(), Some("0x1234abcd"));
        assert!(sd.sole_partition().is_none());
    }

    #[test]
    fn test_unknown_serial_never_matches() {
        let runner = scripted();
        let disks = list_disks(&runner).unwrap();

        let sdb = disks.iter().find(|d| d.device_name == "sdb").unwrap();
        assert_eq!(sdb.serial, None);
        assert!(sdb.partitions.is_empty());
        assert!(!sdb.has_serial(""));
        assert!(find_disk_by_serial(&disks, "").is_none());
    }

    #[test]
    fn test_unmounted_partition_reports_zero_used() {
        let json = r#"{"blockdevices": [{"name": "sdc", "size": 10, "type": "disk",
            "children": [{"name": "sdc1", "size": 10, "type": "part", "mountpoint": null, "fstype": "exfat"}]}]}"#;
        let runner = ScriptedRunner::new().on_ok("lsblk", json).on_ok("udevadm", "ID_SERIAL=XYZ\n");
        let disks = list_disks(&runner).unwrap();

        let part = &disks[0].partitions[0];
        assert!(!part.is_mounted());
        assert_eq!(part.used_bytes, 0);
        assert!(!runner.called("df"));
        assert_eq!(disks[0].serial.as_deref(), Some("XYZ"));
    }

    #[test]
    fn test_lsblk_failure_is_device_query_failed() {
        let runner = ScriptedRunner::new().on_fail("lsblk", 32, "lsblk: failed");
        let err = list_disks(&runner).unwrap_err();
        assert!(matches!(err, Error::DeviceQueryFailed { .. }));

        let runner = ScriptedRunner::new().on_ok("lsblk", "not json");
        let err = list_disks(&runner).unwrap_err();
        assert!(matches!(err, Error::DeviceQueryFailed { .. }));
    }

    #[test]
    fn test_parse_udev_serial() {
        assert_eq!(
            parse_udev_serial("ID_SERIAL=WD_Elements_2621_575834_4D\n").as_deref(),
            Some("2621_575834_4D")
        );
        // underscores in the model stay with the serial
        assert_eq!(
            parse_udev_serial("ID_SERIAL=Samsung_Portable_SSD_T7_S5SXNG0R\n").as_deref(),
            Some("SSD_T7_S5SXNG0R")
        );
        assert_eq!(parse_udev_serial("ID_SERIAL=ABC123\n").as_deref(), Some("ABC123"));
        assert_eq!(parse_udev_serial("ID_SERIAL=\n"), None);
        assert_eq!(parse_udev_serial("DEVNAME=/dev/sda\n"), None);
    }

    #[test]
    fn test_parse_df_used() {
        assert_eq!(parse_df_used("     Used\n  4096\n"), Some(4096));
        assert_eq!(parse_df_used("Used\n"), None);
    }

    #[test]
    fn test_find_partition_accepts_dev_prefix() {
        let runner = scripted();
        let disks = list_disks(&runner).unwrap();
        assert!(find_partition(&disks, "/dev/sda1").is_some());
        assert!(find_partition(&disks, "mmcblk0p2").is_some());
        assert!(find_partition(&disks, "sdz1").is_none());
    }
}
