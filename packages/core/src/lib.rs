//! nasdisk-core: Core library for a small NAS appliance.
//!
//! Assigns physical disks to storage roles by hardware serial, mounts them
//! at paths derived from their position in the role lists, formats them,
//! and publishes shared folders on share disks as Samba exports.
//!
//! # Modules
//!
//! - [`disk`]: Disk inventory using `lsblk`, `udevadm` and `df`
//! - [`role`]: Role assignments and their persisted store
//! - [`folders`]: Shared folder records and their persisted store
//! - [`mount`]: Mount/unmount/format and the role reconciliation passes
//! - [`samba`]: smb.conf rewriting, Samba users and reload
//! - [`share`]: Export provisioning from the shared folder configuration
//! - [`manager`]: Facade tying the stores, runner and settings together
//! - [`executor`]: External command execution with privilege escalation
//! - [`settings`]: TOML settings
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use nasdisk_core::{Role, Settings, StorageManager};
//!
//! let settings = Settings::default();
//! let mut manager = StorageManager::open(&settings).unwrap();
//!
//! // Bind a disk to the share role, then bring every role disk online
//! manager.add_role_assignment("WD-WCC4E1234567", Role::Share).unwrap();
//! for report in manager.mount_all().unwrap() {
//!     println!("{} #{}: {:?}", report.role, report.index, report.outcome);
//! }
//!
//! // Regenerate the Samba exports (requires root)
//! let provisioned = manager.reprovision_shares().unwrap();
//! println!("{} exports", provisioned.exported.len());
//! ```

pub mod disk;
pub mod error;
pub mod executor;
pub mod folders;
pub mod manager;
pub mod mount;
pub mod role;
pub mod samba;
pub mod settings;
pub mod share;
pub mod store;
pub mod systemd;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use disk::{Partition, PhysicalDisk};
pub use error::{Error, Result};
pub use executor::{CommandOutput, CommandRunner, ExecutionContext, PrivilegeEscalation};
pub use folders::{BackupFrequency, ShareConfig, SharedFolder};
pub use manager::StorageManager;
pub use mount::{DiskReport, FsType, Outcome};
pub use role::{Role, RoleConfig};
pub use samba::ExportDefinition;
pub use settings::Settings;
pub use share::ProvisionReport;
