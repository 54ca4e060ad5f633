//! Command execution abstraction with privilege escalation support.
//!
//! Every external tool the library drives (lsblk, mount, mkfs, pdbedit,
//! systemctl, ...) goes through [`CommandRunner`]. [`ExecutionContext`] is the
//! real implementation; tests substitute a scripted runner.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    fn wrapper(self) -> Option<&'static str> {
        match self {
            PrivilegeEscalation::None => None,
            PrivilegeEscalation::Pkexec => Some("pkexec"),
            PrivilegeEscalation::Sudo => Some("sudo"),
        }
    }
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands to completion.
pub trait CommandRunner {
    /// Runs `program` with `args` and waits for it to exit.
    ///
    /// A non-zero exit is not an error here; only failing to start (or
    /// exceeding a timeout) is.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Runs a command, turning a non-zero exit into [`Error::CommandExit`].
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args)?;
        if !output.success() {
            return Err(Error::CommandExit {
                command: program.to_string(),
                code: output.code.unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// Execution context for running system commands.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nasdisk_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// // Default: no privilege escalation, no timeout
/// let ctx = ExecutionContext::default();
///
/// // For terminal use with a bound on each command
/// let tty_ctx = ExecutionContext::with_sudo().timeout(Duration::from_secs(120));
/// assert_eq!(tty_ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
    timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Creates a new execution context with no privilege escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an execution context that uses `pkexec` for privileged commands.
    pub fn with_pkexec() -> Self {
        Self::with_escalation(PrivilegeEscalation::Pkexec)
    }

    /// Creates an execution context that uses `sudo` for privileged commands.
    pub fn with_sudo() -> Self {
        Self::with_escalation(PrivilegeEscalation::Sudo)
    }

    /// Creates an execution context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self {
            escalation,
            timeout: None,
        }
    }

    /// Bounds every command run through this context.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    fn build_command(&self, program: &str, args: &[&str]) -> Command {
        let mut command = match self.escalation.wrapper() {
            Some(wrapper) => {
                let mut command = Command::new(wrapper);
                command.arg(program);
                command
            }
            None => Command::new(program),
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl CommandRunner for ExecutionContext {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!(command = %command_line.trim_end(), escalation = ?self.escalation, "running command");

        let mut command = self.build_command(program, args);
        let output = match self.timeout {
            None => {
                let output = command.output().command_context(program)?;
                CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }
            }
            Some(limit) => {
                let child = command.spawn().command_context(program)?;
                wait_with_timeout(child, program, limit)?
            }
        };

        // pkexec returns 126 when the authentication dialog is dismissed
        if self.escalation == PrivilegeEscalation::Pkexec && output.code == Some(126) {
            return Err(Error::AuthenticationCancelled);
        }

        Ok(output)
    }
}

/// Waits for a spawned child, killing it once `limit` has elapsed.
///
/// Pipes are drained on helper threads so a chatty child cannot block on a
/// full pipe while we poll.
fn wait_with_timeout(mut child: Child, program: &str, limit: Duration) -> Result<CommandOutput> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + limit;
    let status = loop {
        if let Some(status) = child.try_wait().command_context(program)? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Timeout {
                command: program.to_string(),
                secs: limit.as_secs(),
            });
        }
        thread::sleep(Duration::from_millis(25));
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    };

    Ok(CommandOutput {
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}
