//! nasdisk CLI - Command line interface for the NAS storage appliance.
//!
//! Every command prints its result as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nasdisk_core::{
    BackupFrequency, PrivilegeEscalation, Result, Role, Settings, SharedFolder, StorageManager, settings,
};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// NAS disk and share management tool.
#[derive(Parser)]
#[command(name = "nasdisk")]
#[command(about = "Manage NAS role disks and Samba shares", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the mount root from the settings file.
    #[arg(long, global = true)]
    mount_root: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the physical disks currently attached.
    Disks,

    /// Manage role assignments.
    #[command(subcommand)]
    Role(RoleCommand),

    /// Mount every role disk at its derived path.
    Mount {
        /// Only mount disks of this role.
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,
    },

    /// Unmount every role disk.
    Unmount {
        /// Only unmount disks of this role.
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,
    },

    /// Create a new filesystem on a partition. Destroys its contents.
    Format {
        /// Partition, e.g. sdb1 or /dev/sdb1.
        device: String,
        /// ext4, exfat or ntfs.
        fs_type: String,
        #[arg(long)]
        label: Option<String>,
        /// Confirm that the partition's data will be lost.
        #[arg(long)]
        yes: bool,
    },

    /// Manage shared folders.
    #[command(subcommand)]
    Share(ShareCommand),

    /// List the exports present in smb.conf.
    Exports,

    /// Rebuild every export from the shared folder configuration.
    Reprovision,

    /// Remove every export, keeping the global Samba settings.
    ClearShares,
}

#[derive(Subcommand)]
enum RoleCommand {
    /// Assign a role to a disk serial.
    Add {
        serial: String,
        /// backup or share (1 or 2).
        #[arg(value_parser = parse_role)]
        role: Role,
    },
    /// Print the role configuration.
    Show,
}

#[derive(Subcommand)]
enum ShareCommand {
    /// Print the shared folder configuration.
    List,
    /// Add a shared folder, replacing any with the same name.
    Upsert {
        folder: String,
        /// Serial of the share disk holding the folder.
        #[arg(long)]
        disk: String,
        /// Serial of the backup disk.
        #[arg(long)]
        backup_disk: Option<String>,
        /// User with read-write access; repeatable.
        #[arg(long = "rw")]
        users_rw: Vec<String>,
        /// User with read-only access; repeatable.
        #[arg(long = "read")]
        users_r: Vec<String>,
        /// none, daily, weekly or monthly.
        #[arg(long, default_value = "none", value_parser = parse_frequency)]
        frequency: BackupFrequency,
    },
    /// Remove a shared folder by name.
    Remove { folder: String },
}

fn parse_role(s: &str) -> std::result::Result<Role, String> {
    s.parse().map_err(|e: nasdisk_core::Error| e.to_string())
}

fn parse_frequency(s: &str) -> std::result::Result<BackupFrequency, String> {
    s.parse().map_err(|e: nasdisk_core::Error| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match cli.config.clone().or_else(settings::default_settings_path) {
        Some(path) => {
            debug!(path = %path.display(), "loading settings");
            Settings::load(&path)?
        }
        None => Settings::default(),
    };
    if let Some(root) = &cli.mount_root {
        settings.mount_root = root.clone();
    }
    Ok(settings)
}

fn warn_if_unprivileged(settings: &Settings) {
    if settings.escalation == PrivilegeEscalation::None && !nix::unistd::geteuid().is_root() {
        warn!("not running as root and no escalation configured; privileged commands may fail");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| nasdisk_core::Error::Generic {
        message: format!("failed to encode output: {}", e),
        source: None,
    })?;
    println!("{}", json);
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli)?;
    warn_if_unprivileged(&settings);
    let mut manager = StorageManager::open(&settings)?;

    match cli.command {
        Commands::Disks => print_json(&manager.list_disks()?)?,

        Commands::Role(RoleCommand::Add { serial, role }) => {
            manager.add_role_assignment(&serial, role)?;
            print_json(manager.role_config())?;
        }
        Commands::Role(RoleCommand::Show) => print_json(manager.role_config())?,

        Commands::Mount { role } => {
            let reports = match role {
                Some(role) => manager.mount_role(role)?,
                None => manager.mount_all()?,
            };
            print_json(&reports)?;
            if reports.iter().any(|r| r.is_failure()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Unmount { role } => {
            let reports = match role {
                Some(role) => manager.unmount_role(role)?,
                None => manager.unmount_all()?,
            };
            print_json(&reports)?;
            if reports.iter().any(|r| r.is_failure()) {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Format {
            device,
            fs_type,
            label,
            yes,
        } => {
            if !yes {
                eprintln!("Refusing to format {} without --yes", device);
                return Ok(ExitCode::FAILURE);
            }
            manager.format(&device, &fs_type, label.as_deref())?;
            print_json(&serde_json::json!({ "device": device, "fs_type": fs_type }))?;
        }

        Commands::Share(ShareCommand::List) => print_json(manager.shared_folders())?,
        Commands::Share(ShareCommand::Upsert {
            folder,
            disk,
            backup_disk,
            users_rw,
            users_r,
            frequency,
        }) => {
            let mut shared = SharedFolder::new(folder, disk);
            shared.backup_disk_serial = backup_disk;
            shared.users_rw = users_rw.into_iter().collect();
            shared.users_r = users_r.into_iter().collect();
            shared.backup_frequency = frequency;
            manager.upsert_shared_folder(shared)?;
            print_json(manager.shared_folders())?;
        }
        Commands::Share(ShareCommand::Remove { folder }) => {
            let removed = manager.remove_shared_folder(&folder)?;
            print_json(&serde_json::json!({ "folder": folder, "removed": removed }))?;
        }

        Commands::Exports => print_json(&manager.list_exports()?)?,
        Commands::Reprovision => print_json(&manager.reprovision_shares()?)?,
        Commands::ClearShares => {
            manager.clear_shares()?;
            print_json(&manager.list_exports()?)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
