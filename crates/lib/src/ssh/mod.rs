//! SSH access to build containers.
//!
//! `ssh2` is blocking; every entry point that touches the network is async and
//! moves the blocking work onto [`tokio::task::spawn_blocking`]. Login is
//! retried because the container's sshd needs a moment after `docker run`.

mod sftp;
mod shell;

use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use ssh2::{PtyModeOpcode, PtyModes, Session};
use thiserror::Error;
use tracing::{debug, warn};

pub use sftp::SftpDownload;
pub use shell::{ShellEvaluator, run_remote_command};

use crate::consts::{
  DEFAULT_SSH_HOST, DEFAULT_SSH_PASSWORD, DEFAULT_SSH_PORT, DEFAULT_SSH_USER, SSH_LOGIN_ATTEMPTS,
  SSH_LOGIN_BACKOFF,
};

#[derive(Debug, Error)]
pub enum SshError {
  #[error("cannot connect to {address}: {source}")]
  Connect {
    address: String,
    #[source]
    source: io::Error,
  },

  #[error("cannot connect to docker container over ssh after {attempts} attempts - {last}")]
  LoginFailed { attempts: u32, last: String },

  #[error("ssh protocol error: {0}")]
  Protocol(#[from] ssh2::Error),

  #[error("remote command exited with status {code}")]
  RemoteExit { code: i32 },

  #[error("local directory '{0}' does not exist")]
  StagingMissing(PathBuf),

  #[error("local directory '{0}' is not empty")]
  StagingNotEmpty(PathBuf),

  #[error("requested remote file {0} does not exist")]
  RemoteFileMissing(String),

  #[error("cannot archive {dir} dir in docker container - {source}")]
  RemoteArchive {
    dir: String,
    #[source]
    source: Box<SshError>,
  },

  #[error("cannot unarchive tar archive {path} locally: {source}")]
  Unarchive {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("ssh worker task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Endpoint and login of a container's SSH daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCredentials {
  pub ip_address: String,
  pub port: u16,
  pub username: String,
  pub password: String,
}

impl Default for SshCredentials {
  fn default() -> Self {
    Self {
      ip_address: DEFAULT_SSH_HOST.to_string(),
      port: DEFAULT_SSH_PORT,
      username: DEFAULT_SSH_USER.to_string(),
      password: DEFAULT_SSH_PASSWORD.to_string(),
    }
  }
}

impl SshCredentials {
  pub fn address(&self) -> String {
    format!("{}:{}", self.ip_address, self.port)
  }
}

/// An authenticated SSH connection.
pub struct SshSession {
  session: Session,
}

impl SshSession {
  /// Connect and authenticate once. Blocking.
  pub fn login(credentials: &SshCredentials) -> Result<Self, SshError> {
    let address = credentials.address();
    let tcp = TcpStream::connect(&address).map_err(|source| SshError::Connect {
      address: address.clone(),
      source,
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(&credentials.username, &credentials.password)?;

    debug!(address = %address, user = %credentials.username, "ssh login succeeded");
    Ok(Self { session })
  }

  /// Call [`login`](Self::login) up to `attempts` times, sleeping `backoff`
  /// between failures. Blocking.
  pub fn login_with_retries(
    credentials: &SshCredentials,
    attempts: u32,
    backoff: Duration,
  ) -> Result<Self, SshError> {
    let mut last = String::new();
    for attempt in 1..=attempts {
      match Self::login(credentials) {
        Ok(session) => return Ok(session),
        Err(e) => {
          warn!(attempt, address = %credentials.address(), error = %e, "ssh login failed");
          last = e.to_string();
          if attempt < attempts {
            thread::sleep(backoff);
          }
        }
      }
    }
    Err(SshError::LoginFailed { attempts, last })
  }

  /// Login with the default attempt count and backoff.
  pub fn connect(credentials: &SshCredentials) -> Result<Self, SshError> {
    Self::login_with_retries(credentials, SSH_LOGIN_ATTEMPTS, SSH_LOGIN_BACKOFF)
  }

  /// Open an interactive channel with an `xterm` pty and echo disabled.
  fn interactive_channel(&self) -> Result<ssh2::Channel, SshError> {
    let mut channel = self.session.channel_session()?;
    let mut modes = PtyModes::new();
    modes.set_boolean(PtyModeOpcode::ECHO, false);
    modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, 14400);
    modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, 14400);
    channel.request_pty("xterm", Some(modes), Some((80, 40, 0, 0)))?;
    Ok(channel)
  }

  pub(crate) fn session(&self) -> &Session {
    &self.session
  }
}
