//! End-to-end reconciliation through the public API, against a simulated host.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use nasdisk_core::{
    CommandOutput, CommandRunner, Error, Outcome, Result, Role, Settings, SharedFolder, StorageManager,
};
use tempfile::TempDir;

/// One single-partition disk on the simulated host.
struct FakeDisk {
    name: String,
    serial: String,
}

/// Simulates lsblk/udevadm/mount/umount/mkfs/pdbedit/systemctl.
///
/// Mount state lives in a map from partition name to target, so later
/// inventory queries observe earlier mounts.
#[derive(Default)]
struct FakeHost {
    disks: Vec<FakeDisk>,
    users: Vec<String>,
    mounts: RefCell<BTreeMap<String, String>>,
    log: RefCell<Vec<String>>,
}

impl FakeHost {
    fn with_disk(mut self, name: &str, serial: &str) -> Self {
        self.disks.push(FakeDisk {
            name: name.to_string(),
            serial: serial.to_string(),
        });
        self
    }

    fn with_user(mut self, user: &str) -> Self {
        self.users.push(user.to_string());
        self
    }

    fn count(&self, prefix: &str) -> usize {
        self.log.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn lsblk(&self) -> String {
        let mounts = self.mounts.borrow();
        let devices: Vec<_> = self
            .disks
            .iter()
            .map(|d| {
                let part = format!("{}1", d.name);
                serde_json::json!({
                    "name": d.name,
                    "size": 4_000_000_000u64,
                    "type": "disk",
                    "mountpoint": null,
                    "fstype": null,
                    "model": "Fake Disk",
                    "serial": d.serial,
                    "children": [{
                        "name": part,
                        "size": 3_999_000_000u64,
                        "type": "part",
                        "mountpoint": mounts.get(&part),
                        "fstype": "ext4",
                    }],
                })
            })
            .collect();
        serde_json::json!({ "blockdevices": devices }).to_string()
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.log
            .borrow_mut()
            .push(std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" "));

        let output = match (program, args) {
            ("lsblk", _) => ok(self.lsblk()),
            ("udevadm", [.., name]) => {
                let name = name.trim_start_matches("--name=/dev/");
                match self.disks.iter().find(|d| d.name == name) {
                    Some(d) => ok(format!("ID_SERIAL=Fake_Disk_{}\n", d.serial)),
                    None => CommandOutput {
                        code: Some(1),
                        ..Default::default()
                    },
                }
            }
            ("df", _) => ok("Used\n1024\n"),
            ("mount", [device, target]) => {
                let part = device.trim_start_matches("/dev/").to_string();
                self.mounts.borrow_mut().insert(part, target.to_string());
                ok("")
            }
            ("umount", [target]) => {
                self.mounts.borrow_mut().retain(|_, t| t.as_str() != *target);
                ok("")
            }
            ("findmnt", [.., device]) => {
                let part = device.trim_start_matches("/dev/");
                match self.mounts.borrow().get(part) {
                    Some(target) => ok(format!("{}\n", target)),
                    None => CommandOutput {
                        code: Some(1),
                        ..Default::default()
                    },
                }
            }
            ("pdbedit", _) => ok(self
                .users
                .iter()
                .map(|u| format!("{}:1000:\n", u))
                .collect::<String>()),
            _ => ok(""),
        };
        Ok(output)
    }
}

fn settings(dir: &TempDir) -> Settings {
    Settings {
        mount_root: dir.path().join("nas"),
        role_config: dir.path().join("state").join("disks.json"),
        share_config: dir.path().join("state").join("shared-folders.json"),
        smb_conf: dir.path().join("smb.conf"),
        ..Settings::default()
    }
}

fn share_path(dir: &TempDir, index: usize) -> PathBuf {
    dir.path().join("nas").join(format!("DiskShare{}", index))
}

#[test]
fn mount_all_is_idempotent_and_survives_renumbering() {
    let dir = TempDir::new().unwrap();
    let host = FakeHost::default().with_disk("sdb", "SN-AAA").with_disk("sdc", "SN-BBB");
    let mut manager = StorageManager::new(&host, &settings(&dir)).unwrap();
    manager.add_role_assignment("SN-AAA", Role::Share).unwrap();
    manager.add_role_assignment("SN-BBB", Role::Backup).unwrap();

    let first = manager.mount_all().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].role, Role::Share);
    assert!(matches!(first[0].outcome, Outcome::Mounted));
    assert_eq!(first[0].mount_path, Some(share_path(&dir, 0)));
    assert_eq!(first[1].mount_path, Some(dir.path().join("nas").join("DiskBackUp0")));

    let second = manager.mount_all().unwrap();
    assert!(second.iter().all(|r| matches!(r.outcome, Outcome::AlreadyMounted)));
    assert_eq!(host.count("mount "), 2);

    // after a reboot the same disks come back under other kernel names
    let renamed = FakeHost::default().with_disk("sdd", "SN-BBB").with_disk("sda", "SN-AAA");
    let manager = StorageManager::new(&renamed, &settings(&dir)).unwrap();
    let reports = manager.mount_all().unwrap();
    assert_eq!(reports[0].device.as_deref(), Some("sda1"));
    assert_eq!(reports[0].mount_path, Some(share_path(&dir, 0)));

    let unmounted = manager.unmount_all().unwrap();
    assert!(unmounted.iter().all(|r| matches!(r.outcome, Outcome::Unmounted)));
    assert!(renamed.mounts.borrow().is_empty());
}

#[test]
fn role_assignment_rejects_duplicates() {
    let dir = TempDir::new().unwrap();
    let host = FakeHost::default();
    let mut manager = StorageManager::new(&host, &settings(&dir)).unwrap();

    manager.add_role_assignment("SN-AAA", Role::Backup).unwrap();
    let err = manager.add_role_assignment("SN-AAA", Role::Share).unwrap_err();

    assert!(matches!(err, Error::DuplicateSerial { .. }));
    assert_eq!(manager.role_config().backup_serials, ["SN-AAA"]);
    assert!(manager.role_config().share_serials.is_empty());
}

#[test]
fn format_mounted_partition_unmounts_first() {
    let dir = TempDir::new().unwrap();
    let host = FakeHost::default().with_disk("sdb", "SN-AAA");
    let mut manager = StorageManager::new(&host, &settings(&dir)).unwrap();
    manager.add_role_assignment("SN-AAA", Role::Share).unwrap();
    manager.mount_all().unwrap();

    manager.format("/dev/sdb1", "exfat", Some("DATA")).unwrap();

    let log = host.log.borrow();
    let umount = log.iter().position(|c| c.starts_with("umount")).unwrap();
    let mkfs = log.iter().position(|c| c.starts_with("mkfs.exfat")).unwrap();
    assert!(umount < mkfs);
    assert_eq!(log[mkfs], "mkfs.exfat -L DATA /dev/sdb1");
    assert!(host.mounts.borrow().is_empty());
}

#[test]
fn reprovision_exports_folder_on_share_disk() {
    let dir = TempDir::new().unwrap();
    let host = FakeHost::default().with_disk("sdb", "SN-AAA").with_user("alice");
    let mut manager = StorageManager::new(&host, &settings(&dir)).unwrap();
    manager.add_role_assignment("SN-AAA", Role::Share).unwrap();
    manager.mount_all().unwrap();

    let mut media = SharedFolder::new("media", "SN-AAA");
    media.users_rw.insert("alice".to_string());
    manager.upsert_shared_folder(media).unwrap();

    let report = manager.reprovision_shares().unwrap();
    assert_eq!(report.exported.len(), 1);

    let exports = manager.list_exports().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].name, "media");
    assert_eq!(exports[0].path, share_path(&dir, 0).join("media"));
    assert_eq!(exports[0].users, ["alice"]);
    assert!(!exports[0].read_only);
    assert_eq!(host.count("systemctl reload smbd nmbd"), 1);

    manager.clear_shares().unwrap();
    assert!(manager.list_exports().unwrap().is_empty());
    assert!(fs::read_to_string(dir.path().join("smb.conf")).unwrap().contains("[global]"));
}

#[test]
fn reprovision_rejects_unknown_user() {
    let dir = TempDir::new().unwrap();
    let host = FakeHost::default().with_disk("sdb", "SN-AAA").with_user("alice");
    let mut manager = StorageManager::new(&host, &settings(&dir)).unwrap();
    manager.add_role_assignment("SN-AAA", Role::Share).unwrap();

    let mut media = SharedFolder::new("media", "SN-AAA");
    media.users_rw.insert("ghost".to_string());
    manager.upsert_shared_folder(media).unwrap();

    let err = manager.reprovision_shares().unwrap_err();

    assert!(matches!(err, Error::UnknownUser { ref user, .. } if user == "ghost"));
    assert!(manager.list_exports().unwrap().iter().all(|e| e.name != "media"));
    assert!(!Path::new(&share_path(&dir, 0).join("media")).exists());
}
