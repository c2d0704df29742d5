//! Target platform identification.
//!
//! A [`PlatformString`] names the environment a package was built for and
//! serializes to `<machine>-<distro>-<release>` (`x86-64-debian-11`). Explicit
//! strings are given by the caller; auto strings are read from the toolchain
//! image itself by starting a throwaway container and asking `lsb_release` and
//! `uname` over SSH.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildError, ContainerExecutor};
use crate::cleanup::CleanupStack;
use crate::docker::Docker;
use crate::ssh::SshCredentials;

const UNKNOWN: &str = "unknown";
const ANY_MACHINE: &str = "any";

#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("explicit platform string {0} cannot be derived from a container")]
  ExplicitMode(String),

  #[error("'{command}' printed nothing")]
  EmptyOutput { command: &'static str },

  #[error("cannot derive platform string: {0}")]
  Build(#[from] BuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformStringMode {
  #[default]
  Explicit,
  /// Distro, release and machine read from the image.
  Auto,
  /// Distro and release read from the image, machine forced to `any`.
  AnyMachine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformString {
  pub mode: PlatformStringMode,
  pub distro_name: String,
  pub distro_release: String,
  pub machine: String,
}

impl Default for PlatformString {
  fn default() -> Self {
    Self::explicit(UNKNOWN, UNKNOWN, UNKNOWN)
  }
}

impl fmt::Display for PlatformString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.machine, self.distro_name, self.distro_release)
  }
}

impl PlatformString {
  pub fn explicit(distro_name: &str, distro_release: &str, machine: &str) -> Self {
    Self {
      mode: PlatformStringMode::Explicit,
      distro_name: distro_name.to_string(),
      distro_release: distro_release.to_string(),
      machine: machine.to_string(),
    }
  }

  /// A platform string waiting for [`derive`](Self::derive).
  pub fn auto(mode: PlatformStringMode) -> Self {
    Self {
      mode,
      distro_name: String::new(),
      distro_release: String::new(),
      machine: String::new(),
    }
  }

  /// Fill distro, release and machine from a running `docker` container.
  ///
  /// The container is started, queried and removed. Its teardown is
  /// registered on `cleanup` for the duration of the query.
  ///
  /// # Errors
  ///
  /// Explicit strings cannot be derived. Any container or SSH failure is
  /// returned as [`PlatformError::Build`].
  pub async fn derive(
    &mut self,
    docker: Docker,
    credentials: &SshCredentials,
    cleanup: &CleanupStack,
  ) -> Result<(), PlatformError> {
    if self.mode == PlatformStringMode::Explicit {
      return Err(PlatformError::ExplicitMode(self.to_string()));
    }
    let image = docker.image_name.clone();
    let mut executor = ContainerExecutor::new(docker, credentials.clone(), cleanup);
    executor.start(true).await?;

    let queried = async {
      let distro = executor.run_command("lsb_release -is").await?;
      let release = executor.run_command("lsb_release -rs").await?;
      let machine = match self.mode {
        PlatformStringMode::AnyMachine => ANY_MACHINE.to_string(),
        _ => executor.run_command("uname -m").await?,
      };
      Ok::<_, BuildError>((distro, release, machine))
    }
    .await;
    let teardown = executor.teardown().await;

    let (distro, release, machine) = match (queried, teardown) {
      (Ok(values), Ok(())) => values,
      (Ok(_), Err(e)) => return Err(e.into()),
      (Err(e), Ok(())) => return Err(e.into()),
      (Err(e), Err(teardown_err)) => {
        warn!(image = %image, error = %teardown_err, "container teardown failed after query error");
        return Err(e.into());
      }
    };
    self.apply(&distro, &release, &machine)?;
    info!(image = %image, platform = %self, "platform string derived");
    Ok(())
  }

  /// Set the triple from raw `lsb_release -is`, `lsb_release -rs` and
  /// `uname -m` output.
  pub fn apply(&mut self, distro: &str, release: &str, machine: &str) -> Result<(), PlatformError> {
    self.distro_name = parse_distro_name(distro).ok_or(PlatformError::EmptyOutput {
      command: "lsb_release -is",
    })?;
    self.distro_release = parse_release(release).ok_or(PlatformError::EmptyOutput {
      command: "lsb_release -rs",
    })?;
    self.machine = if self.mode == PlatformStringMode::AnyMachine {
      ANY_MACHINE.to_string()
    } else {
      parse_machine(machine).ok_or(PlatformError::EmptyOutput { command: "uname -m" })?
    };
    Ok(())
  }
}

fn first_line(output: &str) -> Option<&str> {
  output.lines().map(str::trim).find(|line| !line.is_empty())
}

pub(crate) fn parse_distro_name(output: &str) -> Option<String> {
  first_line(output).map(str::to_lowercase)
}

pub(crate) fn parse_release(output: &str) -> Option<String> {
  first_line(output).map(str::to_lowercase)
}

/// Machine names use `-` so the platform string splits cleanly on `_`.
pub(crate) fn parse_machine(output: &str) -> Option<String> {
  first_line(output).map(|m| m.to_lowercase().replace('_', "-"))
}
