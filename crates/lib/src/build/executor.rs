//! Lifecycle of one ephemeral build container.
//!
//! ```text
//! Created -> Running -> Executed -> Removed
//!               \___________\_______^  (teardown)
//! ```
//!
//! The teardown action is registered on the [`CleanupStack`] before
//! `docker run` is issued, so an interrupt at any point after that still stops
//! and removes whatever container was started. The normal path consumes the
//! same registration through [`ContainerExecutor::teardown`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::BuildError;
use crate::cleanup::{ActionError, CleanupHandle, CleanupStack};
use crate::consts::DOCKER_INSTALL_DIR;
use crate::docker::Docker;
use crate::ssh::{SftpDownload, ShellEvaluator, SshCredentials, run_remote_command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
  Created,
  Running,
  Executed,
  Removed,
}

impl fmt::Display for ContainerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ContainerState::Created => "created",
      ContainerState::Running => "running",
      ContainerState::Executed => "executed",
      ContainerState::Removed => "removed",
    };
    f.write_str(s)
  }
}

pub struct ContainerExecutor {
  docker: Arc<Mutex<Docker>>,
  image_name: String,
  credentials: SshCredentials,
  cleanup: CleanupStack,
  teardown: Option<CleanupHandle>,
  state: ContainerState,
}

impl fmt::Debug for ContainerExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContainerExecutor")
      .field("image", &self.image_name)
      .field("state", &self.state)
      .finish()
  }
}

impl ContainerExecutor {
  pub fn new(docker: Docker, credentials: SshCredentials, cleanup: &CleanupStack) -> Self {
    Self {
      image_name: docker.image_name.clone(),
      docker: Arc::new(Mutex::new(docker)),
      credentials,
      cleanup: cleanup.clone(),
      teardown: None,
      state: ContainerState::Created,
    }
  }

  pub fn state(&self) -> ContainerState {
    self.state
  }

  fn require(&self, operation: &'static str, allowed: &[ContainerState]) -> Result<(), BuildError> {
    if allowed.contains(&self.state) {
      Ok(())
    } else {
      Err(BuildError::InvalidState {
        operation,
        state: self.state,
      })
    }
  }

  /// Start the container.
  ///
  /// With `check_port`, every mapped host port must be free; otherwise the
  /// container is never started.
  pub async fn start(&mut self, check_port: bool) -> Result<(), BuildError> {
    self.require("start", &[ContainerState::Created])?;
    {
      let docker = self.docker.lock().await;
      if check_port {
        docker.ensure_ports_available().await?;
      }
      docker.check_prerequisites().await?;
    }

    let slot = Arc::clone(&self.docker);
    let handle = self
      .cleanup
      .push(format!("stop and remove container of {}", self.image_name), move || async move {
        let docker = slot.lock().await;
        docker.stop_and_remove().await.map_err(ActionError::from)
      });

    let started = self.docker.lock().await.run().await.map(str::to_string);
    match started {
      Ok(id) => {
        debug!(image = %self.image_name, container = %id, "container running");
        self.teardown = Some(handle);
        self.state = ContainerState::Running;
        Ok(())
      }
      Err(e) => {
        if let Err(teardown_err) = handle.run().await {
          warn!(image = %self.image_name, error = %teardown_err, "nothing to tear down");
        }
        self.state = ContainerState::Removed;
        Err(e.into())
      }
    }
  }

  /// Feed `commands` to one remote shell and wait for it to exit.
  pub async fn execute(&mut self, commands: Vec<String>, log_path: &Path) -> Result<(), BuildError> {
    self.require("execute commands in", &[ContainerState::Running])?;
    ShellEvaluator::new(commands, log_path)
      .run_over_ssh(&self.credentials)
      .await?;
    self.state = ContainerState::Executed;
    Ok(())
  }

  /// Run a single command and return its stdout.
  pub async fn run_command(&self, command: &str) -> Result<String, BuildError> {
    self.require("run a command in", &[ContainerState::Running, ContainerState::Executed])?;
    Ok(run_remote_command(&self.credentials, command).await?)
  }

  /// Download the container's install directory into `local_dir`.
  pub async fn retrieve(&self, local_dir: &Path, log_path: &Path) -> Result<(), BuildError> {
    self.require("retrieve artifacts from", &[ContainerState::Executed])?;
    SftpDownload::new(DOCKER_INSTALL_DIR, local_dir, log_path)
      .download(&self.credentials)
      .await?;
    info!(image = %self.image_name, dir = %local_dir.display(), "install directory retrieved");
    Ok(())
  }

  /// Stop and remove the container.
  ///
  /// # Errors
  ///
  /// Fails with [`BuildError::InvalidState`] when no container was started
  /// or it was already removed, and with [`BuildError::Cleanup`] when docker
  /// refuses.
  pub async fn teardown(&mut self) -> Result<(), BuildError> {
    let Some(handle) = self.teardown.take() else {
      return Err(BuildError::InvalidState {
        operation: "tear down",
        state: self.state,
      });
    };
    self.state = ContainerState::Removed;
    handle.run().await?;
    Ok(())
  }
}
