//! Subprocess execution for host-side tools (`docker`, `git`).
//!
//! Every external program the engine drives on the host goes through
//! [`run_command`] or [`run_command_logged`], so failures carry the rendered
//! command line and exit code.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from running a host process.
#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to spawn '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command failed with exit code {code:?}: {cmd}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("cannot open log file {path}: {source}")]
  LogFile {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl ProcessError {
  /// Exit code of a failed command, if the process ran at all.
  pub fn code(&self) -> Option<i32> {
    match self {
      ProcessError::Failed { code, .. } => *code,
      _ => None,
    }
  }
}

/// Render a program and its arguments the way a shell user would type them.
pub fn render_command_line(program: &str, args: &[String]) -> String {
  let mut line = program.to_string();
  for arg in args {
    line.push(' ');
    line.push_str(arg);
  }
  line
}

/// Run a program to completion and return its trimmed stdout.
///
/// # Errors
///
/// Returns [`ProcessError::Spawn`] if the program cannot be started and
/// [`ProcessError::Failed`] if it exits unsuccessfully.
pub async fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> Result<String, ProcessError> {
  let cmd = render_command_line(program, args);
  debug!(cmd = %cmd, "executing command");

  let mut command = Command::new(program);
  command.args(args).stdin(Stdio::null());
  if let Some(dir) = cwd {
    command.current_dir(dir);
  }

  let output = command
    .output()
    .await
    .map_err(|source| ProcessError::Spawn { cmd: cmd.clone(), source })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(ProcessError::Failed {
      cmd,
      code: output.status.code(),
      stderr,
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Run a program with stdout and stderr appended to `log_path`.
///
/// Used for long-running tools whose transcript belongs in a log file rather
/// than in memory.
pub async fn run_command_logged(
  program: &str,
  args: &[String],
  cwd: Option<&Path>,
  log_path: &Path,
) -> Result<(), ProcessError> {
  let cmd = render_command_line(program, args);
  debug!(cmd = %cmd, log = %log_path.display(), "executing command");

  let open_log = || {
    std::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(log_path)
      .map_err(|source| ProcessError::LogFile {
        path: log_path.display().to_string(),
        source,
      })
  };
  let stdout = open_log()?;
  let stderr = open_log()?;

  let mut command = Command::new(program);
  command
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::from(stdout))
    .stderr(Stdio::from(stderr));
  if let Some(dir) = cwd {
    command.current_dir(dir);
  }

  let status = command
    .status()
    .await
    .map_err(|source| ProcessError::Spawn { cmd: cmd.clone(), source })?;

  if !status.success() {
    return Err(ProcessError::Failed {
      cmd,
      code: status.code(),
      stderr: format!("see {}", log_path.display()),
    });
  }
  Ok(())
}
