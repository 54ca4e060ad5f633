//! Systemd control module.
//!
//! Thin wrappers over `systemctl` for the services the appliance depends on.

use crate::error::{Error, Result};
use crate::executor::CommandRunner;

/// Reloads the configuration of one or more units.
///
/// # Arguments
/// * `units` - Unit names, e.g. `["smbd", "nmbd"]`
pub fn reload_units(runner: &dyn CommandRunner, units: &[&str]) -> Result<()> {
    let mut args = vec!["reload"];
    args.extend_from_slice(units);
    run_systemctl(runner, &args)
}

/// Checks if a unit is active.
///
/// Returns true if the unit is in "active" state.
pub fn is_unit_active(runner: &dyn CommandRunner, unit_name: &str) -> Result<bool> {
    let output = runner.run("systemctl", &["is-active", "--quiet", unit_name])?;
    Ok(output.success())
}

/// Helper function to run systemctl commands.
fn run_systemctl(runner: &dyn CommandRunner, args: &[&str]) -> Result<()> {
    let output = runner.run("systemctl", args)?;

    if !output.success() {
        return Err(Error::Systemd {
            message: format!("systemctl {}: {}", args.join(" "), output.stderr.trim()),
        });
    }

    Ok(())
}
