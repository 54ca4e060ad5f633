//! Export provisioning.
//!
//! Rebuilds the Samba export sections from the shared folder configuration.
//! Each folder lives on the share disk named by its main serial, so its
//! export path is derived the same way the mount pass derives mount paths.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::folders::{ShareConfig, SharedFolder, validate_folder_name};
use crate::mount::{create_mount_point, mount_path};
use crate::role::{Role, RoleConfig};
use crate::samba::{self, ExportDefinition};

/// Summary of a provisioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    /// Exports written, in configuration order.
    pub exported: Vec<ExportDefinition>,
    /// Folders whose main disk has no share assignment.
    pub skipped: Vec<String>,
}

/// Builds the export for `folder`.
///
/// Read-write users take precedence: a folder with any read-write user is
/// exported writable to those users, otherwise read-only to its readers.
/// Returns `None` when the main disk is not a share disk or when nobody is
/// granted access, since an empty `valid users` admits every Samba account.
pub fn export_for(folder: &SharedFolder, roles: &RoleConfig, mount_root: &Path) -> Option<ExportDefinition> {
    if folder.users_rw.is_empty() && folder.users_r.is_empty() {
        return None;
    }
    let index = roles.index_of(Role::Share, &folder.main_disk_serial)?;

    let (users, read_only) = if !folder.users_rw.is_empty() {
        (&folder.users_rw, false)
    } else {
        (&folder.users_r, true)
    };

    Some(ExportDefinition {
        name: folder.folder.clone(),
        path: mount_path(mount_root, Role::Share, index).join(&folder.folder),
        users: users.iter().cloned().collect(),
        read_only,
    })
}

/// Replaces every export with the ones derived from `shares`.
///
/// The existing file is backed up once, then reset to its `[global]`
/// section. Exports are appended and written one folder at a time, so an
/// unknown user stops the pass with the earlier folders already exported.
pub fn reprovision_shares(
    runner: &dyn CommandRunner,
    shares: &ShareConfig,
    roles: &RoleConfig,
    mount_root: &Path,
    smb_conf: &Path,
) -> Result<ProvisionReport> {
    // nothing is touched if the user database is unreachable
    let known_users = samba::list_users(runner)?;

    let existing = samba::read_smb_conf(smb_conf)?;
    samba::backup_smb_conf(smb_conf)?;
    let mut content = samba::ensure_global_content(&samba::reset_shares_content(&existing));
    samba::write_smb_conf(smb_conf, &content)?;

    let mut report = ProvisionReport::default();
    for folder in &shares.folders {
        // the documents are hand-editable, so names are checked again here
        if let Err(e) = validate_folder_name(&folder.folder) {
            warn!(folder = ?folder.folder, error = %e, "skipping folder");
            report.skipped.push(folder.folder.clone());
            continue;
        }
        if folder.users_rw.is_empty() && folder.users_r.is_empty() {
            warn!(folder = %folder.folder, "no users granted access, skipping");
            report.skipped.push(folder.folder.clone());
            continue;
        }

        let Some(export) = export_for(folder, roles, mount_root) else {
            warn!(
                folder = %folder.folder,
                serial = %folder.main_disk_serial,
                "main disk is not assigned the share role, skipping"
            );
            report.skipped.push(folder.folder.clone());
            continue;
        };

        let step = export_folder(folder, &export, &known_users, smb_conf, &mut content);
        if let Err(e) = step {
            // keep what was written so far live
            if let Err(reload_error) = samba::reload(runner) {
                warn!(error = %reload_error, "reload after failed provisioning step failed");
            }
            return Err(e);
        }
        info!(folder = %export.name, path = %export.path.display(), "exported shared folder");
        report.exported.push(export);
    }

    samba::reload(runner)?;
    Ok(report)
}

fn export_folder(
    folder: &SharedFolder,
    export: &ExportDefinition,
    known_users: &BTreeSet<String>,
    smb_conf: &Path,
    content: &mut String,
) -> Result<()> {
    if let Some(user) = folder.all_users().find(|u| !known_users.contains(*u)) {
        return Err(Error::UnknownUser {
            folder: folder.folder.clone(),
            user: user.to_string(),
        });
    }

    create_mount_point(&export.path)?;
    content.push_str(&export.to_section());
    samba::write_smb_conf(smb_conf, content)
}

/// Removes every export, keeping `[global]`, and reloads Samba.
pub fn clear_shares(runner: &dyn CommandRunner, smb_conf: &Path) -> Result<()> {
    let existing = samba::read_smb_conf(smb_conf)?;
    samba::backup_smb_conf(smb_conf)?;
    samba::write_smb_conf(smb_conf, &samba::reset_shares_content(&existing))?;
    info!(path = %smb_conf.display(), "cleared all exports");
    samba::reload(runner)
}

/// Exports currently present in the Samba configuration.
pub fn list_exports(smb_conf: &Path) -> Result<Vec<ExportDefinition>> {
    let content = samba::read_smb_conf(smb_conf)?;
    Ok(samba::parse_exports(&content))
}
