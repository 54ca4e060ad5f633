//! Samba export backend.
//!
//! Reads and rewrites `smb.conf` share sections, queries the Samba user
//! database and reloads the daemons. The `[global]` section (and anything
//! before the first section) belongs to the administrator and is preserved;
//! every other section is owned by this tool and regenerated wholesale.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::executor::CommandRunner;
use crate::store;
use crate::systemd;

/// Services reloaded after the configuration changes.
const SAMBA_UNITS: [&str; 2] = ["smbd", "nmbd"];

/// `[global]` written when the file has none.
const DEFAULT_GLOBAL_SECTION: &str = r"[global]
   workgroup = WORKGROUP
   server string = Samba Server
   security = user
   map to guest = never
   usershare allow guests = no
   obey pam restrictions = yes
   unix password sync = yes
   passwd program = /usr/bin/passwd %u
   passwd chat = *Enter\snew\s*\spassword:* %n\n *Retype\snew\s*\spassword:* %n\n *password\supdated\ssuccessfully* .
   pam password change = yes
   socket options = TCP_NODELAY
   dns proxy = no
";

/// Global parameters forced on every provisioning pass.
const ENFORCED_GLOBALS: [(&str, &str); 2] = [
    ("map to guest", "never"),
    ("usershare allow guests", "no"),
];

/// One network export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportDefinition {
    /// Share name as seen by clients.
    pub name: String,
    /// Directory exported.
    pub path: PathBuf,
    /// Users allowed to connect.
    pub users: Vec<String>,
    /// Whether the whole export is read-only.
    pub read_only: bool,
}

impl ExportDefinition {
    /// Renders the export as an smb.conf section, preceded by a blank line.
    pub fn to_section(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        format!(
            "\n[{name}]\n    path = {path}\n    valid users = {users}\n    browseable = yes\n    writable = {writable}\n    read only = {read_only}\n    create mask = 0664\n    directory mask = 0775\n    guest ok = no\n",
            name = self.name,
            path = self.path.display(),
            users = self.users.join(","),
            writable = yes_no(!self.read_only),
            read_only = yes_no(self.read_only),
        )
    }
}

/// Returns the section name if `line` is a section header.
fn section_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')?
        .strip_suffix(']')
        .map(str::trim)
}

fn is_global(name: &str) -> bool {
    name.eq_ignore_ascii_case("global")
}

fn is_comment_or_blank(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#') || t.starts_with(';')
}

/// Splits a `key = value` parameter line, lowercasing the key.
fn parameter(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim().to_ascii_lowercase(), value.trim()))
}

/// Removes every section except `[global]`.
///
/// Lines before the first section are kept as they are.
pub fn reset_shares_content(content: &str) -> String {
    let mut output = String::new();
    let mut keep = true;

    for line in content.lines() {
        if let Some(name) = section_name(line) {
            keep = is_global(name);
        }
        if keep {
            output.push_str(line);
            output.push('\n');
        }
    }

    output
}

/// Makes sure a `[global]` section exists and forbids guest access.
pub fn ensure_global_content(content: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let Some(global_start) = lines
        .iter()
        .position(|l| section_name(l).is_some_and(is_global))
    else {
        let mut output = DEFAULT_GLOBAL_SECTION.to_string();
        if !content.trim().is_empty() {
            output.push('\n');
            output.push_str(content);
            if !content.ends_with('\n') {
                output.push('\n');
            }
        }
        return output;
    };

    let global_end = lines[global_start + 1..]
        .iter()
        .position(|l| section_name(l).is_some())
        .map(|offset| global_start + 1 + offset)
        .unwrap_or(lines.len());

    let mut missing = Vec::new();
    for (key, value) in ENFORCED_GLOBALS {
        let existing = (global_start + 1..global_end).find(|&i| {
            !is_comment_or_blank(&lines[i]) && parameter(&lines[i]).is_some_and(|(k, _)| k == key)
        });
        match existing {
            Some(i) => lines[i] = format!("   {} = {}", key, value),
            None => missing.push(format!("   {} = {}", key, value)),
        }
    }

    // insert after the last parameter line of the section
    let insert_at = (global_start + 1..global_end)
        .rev()
        .find(|&i| !lines[i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(global_start + 1);
    for (offset, line) in missing.into_iter().enumerate() {
        lines.insert(insert_at + offset, line);
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

/// Parses the export sections of an smb.conf.
pub fn parse_exports(content: &str) -> Vec<ExportDefinition> {
    let mut exports = Vec::new();
    let mut current: Option<ExportDefinition> = None;

    for line in content.lines() {
        if is_comment_or_blank(line) {
            continue;
        }

        if let Some(name) = section_name(line) {
            exports.extend(current.take());
            if !is_global(name) {
                current = Some(ExportDefinition {
                    name: name.to_string(),
                    path: PathBuf::new(),
                    users: Vec::new(),
                    read_only: true,
                });
            }
            continue;
        }

        let (Some(export), Some((key, value))) = (current.as_mut(), parameter(line)) else {
            continue;
        };
        match key.as_str() {
            "path" => export.path = PathBuf::from(value),
            "valid users" => {
                export.users = value
                    .split([',', ' ', '\t'])
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "read only" => export.read_only = value.eq_ignore_ascii_case("yes"),
            "writable" | "writeable" | "write ok" => {
                export.read_only = !value.eq_ignore_ascii_case("yes");
            }
            _ => {}
        }
    }
    exports.extend(current);

    exports
}

/// Reads smb.conf; a missing file reads as empty.
pub fn read_smb_conf(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).smb_conf_read_context(path),
    }
}

/// Replaces smb.conf with `content`.
pub fn write_smb_conf(path: &Path, content: &str) -> Result<()> {
    store::replace_file(path, content.as_bytes()).smb_conf_write_context(path)
}

/// Creates a timestamped backup of smb.conf, if it exists.
///
/// Returns the path to the backup file.
pub fn backup_smb_conf(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let timestamp = unix_timestamp();
    let backup_path = PathBuf::from(format!("{}.backup.{}", path.display(), timestamp));
    fs::copy(path, &backup_path).backup_context(&backup_path)?;

    debug!(backup = %backup_path.display(), "backed up smb.conf");
    Ok(Some(backup_path))
}

/// Simple timestamp without external dependencies.
fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lists the users known to Samba (`pdbedit -L`).
pub fn list_users(runner: &dyn CommandRunner) -> Result<BTreeSet<String>> {
    let output = runner
        .run("pdbedit", &["-L"])
        .map_err(|e| Error::ShareBackendUnavailable {
            message: format!("cannot list Samba users: {}", e),
        })?;

    if !output.success() {
        return Err(Error::ShareBackendUnavailable {
            message: format!("pdbedit -L failed: {}", output.stderr.trim()),
        });
    }

    Ok(parse_pdbedit_users(&output.stdout))
}

/// Extracts user names from `pdbedit -L` lines (`name:uid:full name`).
fn parse_pdbedit_users(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reloads smbd and nmbd so the written configuration takes effect.
pub fn reload(runner: &dyn CommandRunner) -> Result<()> {
    match systemd::reload_units(runner, &SAMBA_UNITS) {
        Ok(()) => {
            info!("reloaded Samba");
            Ok(())
        }
        Err(e) => {
            let running = systemd::is_unit_active(runner, SAMBA_UNITS[0]).unwrap_or(false);
            if !running {
                warn!("smbd is not running");
            }
            Err(Error::ShareBackendUnavailable {
                message: format!("reload failed (smbd running: {}): {}", running, e),
            })
        }
    }
}
