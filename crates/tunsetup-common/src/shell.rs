//! Host command execution.
//!
//! Every change the engine makes to the host's network configuration is a
//! command line run through the platform shell (`cmd /C` on Windows,
//! `/bin/sh -c` elsewhere). Execution is blocking: configuration steps are
//! strictly ordered and never overlap.
//!
//! # Example
//!
//! ```ignore
//! use tunsetup_common::shell::{self, NETSH_CMD};
//!
//! let cmd = format!("{} interface ip show config name=12", NETSH_CMD);
//! let result = shell::exec(&cmd)?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::{Command, Stdio};

use crate::error::{SetupError, SetupResult};

/// The `netsh` network shell.
pub const NETSH_CMD: &str = "netsh";

/// The `ipconfig` utility (DNS cache, DHCP release/renew).
pub const IPCONFIG_CMD: &str = "ipconfig";

/// The legacy `route` utility.
pub const ROUTE_CMD: &str = "route";

/// PowerShell, used for cmdlet-only subsystems.
pub const POWERSHELL_CMD: &str = "powershell -NoProfile -NonInteractive -Command";

/// Characters that cannot appear inside a double-quoted command argument.
static UNQUOTABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["\r\n]"#).expect("Invalid regex pattern"));

/// Quotes a string for use as a single double-quoted argument.
///
/// Double quotes and line breaks cannot be escaped portably for the host
/// tools, so they are removed.
///
/// # Example
///
/// ```
/// use tunsetup_common::shell::quote_arg;
///
/// assert_eq!(quote_arg("Local Area Connection"), "\"Local Area Connection\"");
/// assert_eq!(quote_arg("bad\"name"), "\"badname\"");
/// ```
pub fn quote_arg(s: &str) -> String {
    format!("\"{}\"", UNQUOTABLE_RE.replace_all(s, ""))
}

/// Quotes a string as a PowerShell single-quoted literal.
///
/// # Example
///
/// ```
/// use tunsetup_common::shell::psquote;
///
/// assert_eq!(psquote(".corp.example"), "'.corp.example'");
/// assert_eq!(psquote("it's"), "'it''s'");
/// ```
pub fn psquote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Result of a host command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The captured stdout output.
    pub stdout: String,
    /// The captured stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[cfg(windows)]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

#[cfg(not(windows))]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(cmd);
    command
}

/// Executes a host command, blocking until it exits.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The command execution result
/// * `Err(SetupError)` - If the command could not be spawned
pub fn exec(cmd: &str) -> SetupResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing host command");

    let output = shell_command(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| SetupError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a host command and fails on non-zero exit.
///
/// # Returns
///
/// * `Ok(String)` - The stdout output on success
/// * `Err(SetupError)` - If the command fails or returns non-zero
pub fn exec_or_throw(cmd: &str) -> SetupResult<String> {
    let result = exec(cmd)?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(SetupError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
