//! Storage manager facade.
//!
//! Owns the command runner, the settings and both configuration stores, and
//! exposes the operations front ends call. Every operation takes a fresh
//! inventory snapshot; nothing about the hardware is cached.

use std::path::PathBuf;

use crate::disk::{self, PhysicalDisk};
use crate::error::{Error, Result};
use crate::executor::{CommandRunner, ExecutionContext};
use crate::folders::{ShareStore, SharedFolder};
use crate::mount::{self, DiskReport};
use crate::role::{Role, RoleConfig, RoleStore};
use crate::samba::ExportDefinition;
use crate::settings::Settings;
use crate::share::{self, ProvisionReport};

pub struct StorageManager<R: CommandRunner> {
    runner: R,
    mount_root: PathBuf,
    smb_conf: PathBuf,
    roles: RoleStore,
    shares: ShareStore,
}

impl StorageManager<ExecutionContext> {
    /// Opens the stores named by `settings` with the runner they describe.
    ///
    /// Missing or unreadable configuration documents start empty.
    pub fn open(settings: &Settings) -> Result<Self> {
        Self::new(settings.execution_context(), settings)
    }
}

impl<R: CommandRunner> StorageManager<R> {
    pub fn new(runner: R, settings: &Settings) -> Result<Self> {
        let mount_root = settings.absolute_mount_root()?;
        Ok(Self {
            runner,
            mount_root,
            smb_conf: settings.smb_conf.clone(),
            roles: RoleStore::load_or_default(&settings.role_config),
            shares: ShareStore::load_or_default(&settings.share_config),
        })
    }

    pub fn mount_root(&self) -> &std::path::Path {
        &self.mount_root
    }

    /// Current physical disks.
    pub fn list_disks(&self) -> Result<Vec<PhysicalDisk>> {
        disk::list_disks(&self.runner)
    }

    pub fn role_config(&self) -> &RoleConfig {
        self.roles.config()
    }

    pub fn add_role_assignment(&mut self, serial: &str, role: Role) -> Result<()> {
        self.roles.add_role(serial, role)
    }

    /// Mounts every role disk, share disks first.
    pub fn mount_all(&self) -> Result<Vec<DiskReport>> {
        let inventory = self.list_disks()?;
        Ok(mount::mount_all(&self.runner, &inventory, self.roles.config(), &self.mount_root))
    }

    pub fn mount_role(&self, role: Role) -> Result<Vec<DiskReport>> {
        let inventory = self.list_disks()?;
        Ok(mount::mount_role(
            &self.runner,
            &inventory,
            self.roles.config(),
            &self.mount_root,
            role,
        ))
    }

    pub fn unmount_all(&self) -> Result<Vec<DiskReport>> {
        let inventory = self.list_disks()?;
        Ok(mount::unmount_all(&self.runner, &inventory, self.roles.config()))
    }

    pub fn unmount_role(&self, role: Role) -> Result<Vec<DiskReport>> {
        let inventory = self.list_disks()?;
        Ok(mount::unmount_role(&self.runner, &inventory, self.roles.config(), role))
    }

    /// Formats the partition `device` (e.g. "sdb1" or "/dev/sdb1").
    pub fn format(&self, device: &str, fs_type: &str, label: Option<&str>) -> Result<()> {
        let inventory = self.list_disks()?;
        let partition = disk::find_partition(&inventory, device).ok_or_else(|| Error::DeviceNotFound {
            device: device.to_string(),
        })?;
        partition.format(&self.runner, fs_type, label)
    }

    pub fn shared_folders(&self) -> &[SharedFolder] {
        self.shares.folders()
    }

    pub fn upsert_shared_folder(&mut self, folder: SharedFolder) -> Result<()> {
        self.shares.upsert(folder)
    }

    pub fn remove_shared_folder(&mut self, name: &str) -> Result<bool> {
        self.shares.remove(name)
    }

    /// Rebuilds every export from the shared folder configuration.
    pub fn reprovision_shares(&self) -> Result<ProvisionReport> {
        share::reprovision_shares(
            &self.runner,
            self.shares.config(),
            self.roles.config(),
            &self.mount_root,
            &self.smb_conf,
        )
    }

    pub fn clear_shares(&self) -> Result<()> {
        share::clear_shares(&self.runner, &self.smb_conf)
    }

    pub fn list_exports(&self) -> Result<Vec<ExportDefinition>> {
        share::list_exports(&self.smb_conf)
    }
}
