//! Command execution for the ipset manager.
//!
//! The synchronizer never launches processes itself. It hands an argv
//! vector (and optionally a payload for standard input) to a
//! [`CommandExecutor`], which is the seam where tests substitute a
//! recording double.
//!
//! # Example
//!
//! ```ignore
//! use ipsetmgr_common::shell::{CommandExecutor, ShellExecutor, IPSET_CMD};
//!
//! let executor = ShellExecutor::with_root_helper("sudo");
//! let argv = vec![IPSET_CMD.to_string(), "destroy".to_string(), "IPv4sg1".to_string()];
//! executor.execute(&argv, None, true).await?;
//! ```

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{IpsetError, IpsetResult};

/// Default name of the `ipset` utility, resolved through `PATH`.
pub const IPSET_CMD: &str = "ipset";

/// Renders an argv vector as a single line for logs and error messages.
pub fn render_argv(argv: &[String]) -> String {
    argv.join(" ")
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
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

/// Executes set-management commands on behalf of the synchronizer.
///
/// Implementations must preserve argument order exactly, deliver
/// `process_input` verbatim on standard input when present, and report a
/// non-zero exit as an error distinct from success.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `argv` and returns its stdout on success.
    async fn execute(
        &self,
        argv: &[String],
        process_input: Option<&str>,
        run_as_root: bool,
    ) -> IpsetResult<String>;
}

/// Spawns commands as child processes.
///
/// When a command asks for elevation and a root helper is configured
/// (e.g. `sudo`), the helper's words are prepended to the argv.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    root_helper: Vec<String>,
}

impl ShellExecutor {
    /// Creates an executor that runs commands with the current privileges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor that elevates through `helper`.
    ///
    /// The helper string is split on whitespace, so `"sudo -n"` works.
    pub fn with_root_helper(helper: &str) -> Self {
        Self {
            root_helper: helper.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Returns the argv that will actually be spawned.
    pub fn full_argv(&self, argv: &[String], run_as_root: bool) -> Vec<String> {
        if run_as_root && !self.root_helper.is_empty() {
            self.root_helper.iter().chain(argv).cloned().collect()
        } else {
            argv.to_vec()
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        argv: &[String],
        process_input: Option<&str>,
        run_as_root: bool,
    ) -> IpsetResult<String> {
        let full = self.full_argv(argv, run_as_root);
        let result = exec(&full, process_input).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(IpsetError::ShellCommandFailed {
                command: render_argv(&full),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

/// Logs commands instead of running them.
///
/// Used by the daemon's dry-run mode. Every command succeeds with empty
/// output.
#[derive(Debug, Clone, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl CommandExecutor for LoggingExecutor {
    async fn execute(
        &self,
        argv: &[String],
        process_input: Option<&str>,
        run_as_root: bool,
    ) -> IpsetResult<String> {
        tracing::info!(command = %render_argv(argv), run_as_root, "dry-run");
        if let Some(input) = process_input {
            for line in input.lines() {
                tracing::info!("  {}", line);
            }
        }
        Ok(String::new())
    }
}

/// Executes an argv vector asynchronously, feeding `input` on stdin.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The command execution result
/// * `Err(IpsetError)` - If the command could not be spawned or fed
pub async fn exec(argv: &[String], input: Option<&str>) -> IpsetResult<ExecResult> {
    let command = render_argv(argv);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| IpsetError::internal("cannot execute an empty command"))?;

    tracing::debug!(command = %command, has_input = input.is_some(), "Executing command");

    let spawn_err = |e: std::io::Error| IpsetError::ShellExec {
        command: command.clone(),
        source: e,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    if let Some(data) = input {
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(data.as_bytes()).await {
                Ok(()) => {}
                // The child quit before reading everything; its exit status
                // and stderr below say why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(command = %command, "Child closed stdin early");
                }
                Err(e) => return Err(spawn_err(e)),
            }
            // Dropping stdin closes the pipe so the child sees EOF.
        }
    }

    let output = child.wait_with_output().await.map_err(spawn_err)?;

    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %command, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %command,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}
