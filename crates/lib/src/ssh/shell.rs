use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{SshCredentials, SshError, SshSession};

/// Runs a list of commands in one remote `bash` session.
///
/// Commands share the session: working directory changes and exported
/// variables persist from one line to the next. The transcript is appended to
/// a log file.
#[derive(Debug, Clone)]
pub struct ShellEvaluator {
  pub commands: Vec<String>,
  pub log_path: PathBuf,
}

impl ShellEvaluator {
  pub fn new(commands: Vec<String>, log_path: impl Into<PathBuf>) -> Self {
    Self {
      commands,
      log_path: log_path.into(),
    }
  }

  /// Bytes fed to the remote shell's stdin: every command on its own line,
  /// then `exit`.
  pub fn script(&self) -> String {
    let mut script = String::new();
    for command in self.commands.iter().map(String::as_str).chain(std::iter::once("exit")) {
      script.push_str(command);
      script.push('\n');
    }
    script
  }

  /// Log in, run the whole command list and block until the shell exits.
  ///
  /// # Errors
  ///
  /// Fails when login fails after retries, the transcript cannot be written,
  /// or the shell exits with a non-zero status.
  pub async fn run_over_ssh(&self, credentials: &SshCredentials) -> Result<(), SshError> {
    info!(commands = self.commands.len(), log = %self.log_path.display(), "running remote shell session");
    let credentials = credentials.clone();
    let script = self.script();
    let log_path = self.log_path.clone();

    tokio::task::spawn_blocking(move || run_shell_blocking(&credentials, &script, &log_path)).await?
  }
}

fn run_shell_blocking(credentials: &SshCredentials, script: &str, log_path: &Path) -> Result<(), SshError> {
  let session = SshSession::connect(credentials)?;
  let mut channel = session.interactive_channel()?;
  channel.shell()?;
  channel.write_all(script.as_bytes())?;
  channel.flush()?;
  channel.send_eof()?;

  let mut log = OpenOptions::new().create(true).append(true).open(log_path)?;
  io::copy(&mut channel, &mut log)?;
  channel.wait_close()?;

  let code = channel.exit_status()?;
  debug!(code, "remote shell exited");
  if code != 0 {
    return Err(SshError::RemoteExit { code });
  }
  Ok(())
}

/// Execute one command over SSH and return its stdout.
pub async fn run_remote_command(credentials: &SshCredentials, command: &str) -> Result<String, SshError> {
  debug!(command = %command, "running remote command");
  let credentials = credentials.clone();
  let command = command.to_string();

  tokio::task::spawn_blocking(move || {
    let session = SshSession::connect(&credentials)?;
    let mut channel = session.session().channel_session()?;
    channel.exec(&command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    channel.wait_close()?;

    let code = channel.exit_status()?;
    if code != 0 {
      return Err(SshError::RemoteExit { code });
    }
    Ok(stdout)
  })
  .await?
}
