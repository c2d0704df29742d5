//! Docker container control through the `docker` CLI.
//!
//! A [`Docker`] value describes one container to start (image, port and volume
//! mappings) and, once [`Docker::run`] succeeded, remembers its ID so it can be
//! stopped and removed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::consts::{CONTAINER_SSH_PORT, DEFAULT_IMAGE_NAME, DEFAULT_SSH_PORT};
use crate::util::process::{ProcessError, run_command, run_command_logged};

/// Program used when no explicit docker executable is configured.
pub const DOCKER_EXECUTABLE: &str = "docker";

static CONTAINER_ID_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z]+").expect("static regex is valid"));

#[derive(Debug, Error)]
pub enum DockerError {
  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("cannot mount non existent directory as volume: '{0}'")]
  MissingVolume(PathBuf),

  #[error("volume mapping is already set: '{host}' --> '{container}'")]
  DuplicateVolume { host: PathBuf, container: String },

  #[error("docker run printed no container id: '{output}'")]
  NoContainerId { output: String },

  #[error("cannot tear down unknown container of image '{image}': it was never started")]
  UnknownContainer { image: String },

  #[error("port {0} is already published by another container")]
  PortInUse(u16),

  #[error("Dockerfile directory of image '{0}' is empty")]
  EmptyDockerfileDir(String),
}

/// Description of one build container.
#[derive(Debug, Clone)]
pub struct Docker {
  pub executable: PathBuf,
  pub image_name: String,
  /// Host port -> container port.
  pub ports: BTreeMap<u16, u16>,
  /// Absolute host directory -> container directory.
  pub volumes: BTreeMap<PathBuf, String>,
  pub run_as_daemon: bool,
  container_id: Option<String>,
}

impl Default for Docker {
  fn default() -> Self {
    Self {
      executable: PathBuf::from(DOCKER_EXECUTABLE),
      image_name: DEFAULT_IMAGE_NAME.to_string(),
      ports: BTreeMap::from([(DEFAULT_SSH_PORT, CONTAINER_SSH_PORT)]),
      volumes: BTreeMap::new(),
      run_as_daemon: true,
      container_id: None,
    }
  }
}

impl Docker {
  pub fn new(image_name: impl Into<String>) -> Self {
    Self {
      image_name: image_name.into(),
      ..Self::default()
    }
  }

  fn program(&self) -> String {
    self.executable.to_string_lossy().to_string()
  }

  /// ID of the running container, if [`run`](Self::run) succeeded.
  pub fn container_id(&self) -> Option<&str> {
    self.container_id.as_deref()
  }

  /// Map `host` into the container at `container`.
  ///
  /// # Errors
  ///
  /// A host directory can be mounted only once.
  pub fn set_volume(&mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Result<(), DockerError> {
    let host = host.into();
    let container = container.into();
    if let Some(existing) = self.volumes.get(&host) {
      return Err(DockerError::DuplicateVolume {
        host,
        container: existing.clone(),
      });
    }
    self.volumes.insert(host, container);
    Ok(())
  }

  /// Arguments for `docker run`, in deterministic order.
  pub fn run_args(&self) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    if self.run_as_daemon {
      args.push("-d".to_string());
    }
    for (host, container) in &self.ports {
      args.push("-p".to_string());
      args.push(format!("{host}:{container}"));
    }
    for (host, container) in &self.volumes {
      args.push("-v".to_string());
      args.push(format!("{}:{}", host.display(), container));
    }
    args.push(self.image_name.clone());
    args
  }

  /// Check that docker is usable and every mounted host directory exists.
  pub async fn check_prerequisites(&self) -> Result<(), DockerError> {
    run_command(&self.program(), &["images".to_string()], None).await?;
    for host in self.volumes.keys() {
      if !host.exists() {
        return Err(DockerError::MissingVolume(host.clone()));
      }
    }
    Ok(())
  }

  /// Start the container and record its ID.
  pub async fn run(&mut self) -> Result<&str, DockerError> {
    let output = run_command(&self.program(), &self.run_args(), None).await?;
    let id = CONTAINER_ID_RE.find(&output).map(|m| m.as_str().to_string());
    let Some(id) = id else {
      return Err(DockerError::NoContainerId { output });
    };

    info!(image = %self.image_name, container = %id, "container started");
    Ok(self.container_id.insert(id).as_str())
  }

  fn require_id(&self) -> Result<&str, DockerError> {
    self.container_id().ok_or_else(|| DockerError::UnknownContainer {
      image: self.image_name.clone(),
    })
  }

  pub async fn stop(&self) -> Result<(), DockerError> {
    let id = self.require_id()?;
    run_command(&self.program(), &["stop".to_string(), id.to_string()], None).await?;
    Ok(())
  }

  pub async fn remove(&self) -> Result<(), DockerError> {
    let id = self.require_id()?;
    run_command(&self.program(), &["rm".to_string(), id.to_string()], None).await?;
    Ok(())
  }

  /// Stop then remove the container. Removal is attempted even if stopping
  /// fails; the first error is returned.
  pub async fn stop_and_remove(&self) -> Result<(), DockerError> {
    let stopped = self.stop().await;
    if let Err(e) = &stopped {
      warn!(image = %self.image_name, error = %e, "cannot stop container");
    }
    let removed = self.remove().await;
    if let Err(e) = &removed {
      warn!(image = %self.image_name, error = %e, "cannot remove container");
    }
    stopped.and(removed)?;
    info!(image = %self.image_name, container = ?self.container_id, "container removed");
    Ok(())
  }

  /// Returns `true` when no running container publishes `port`.
  pub async fn is_port_available(&self, port: u16) -> Result<bool, DockerError> {
    let args = [
      "container".to_string(),
      "ls".to_string(),
      "--filter".to_string(),
      format!("publish={port}"),
      "--format".to_string(),
      "{{.ID}}{{.Ports}}".to_string(),
    ];
    let output = run_command(&self.program(), &args, None).await?;
    Ok(output.is_empty())
  }

  /// Fail with [`DockerError::PortInUse`] if any mapped host port is taken.
  pub async fn ensure_ports_available(&self) -> Result<(), DockerError> {
    for host in self.ports.keys() {
      if !self.is_port_available(*host).await? {
        return Err(DockerError::PortInUse(*host));
      }
    }
    Ok(())
  }
}

/// Build `tag` from the Dockerfile in `dockerfile_dir`, logging to `log_path`.
pub async fn build_image(
  executable: &Path,
  dockerfile_dir: &Path,
  tag: &str,
  log_path: &Path,
) -> Result<(), DockerError> {
  if dockerfile_dir.as_os_str().is_empty() {
    return Err(DockerError::EmptyDockerfileDir(tag.to_string()));
  }
  info!(image = %tag, "building docker image");
  let args = [
    "build".to_string(),
    dockerfile_dir.to_string_lossy().to_string(),
    "--tag".to_string(),
    tag.to_string(),
  ];
  run_command_logged(&executable.to_string_lossy(), &args, None, log_path).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::fake_docker;
  use tempfile::TempDir;

  #[test]
  fn default_maps_ssh_port_and_runs_detached() {
    let docker = Docker::default();
    assert_eq!(docker.image_name, "debian11");
    assert_eq!(docker.run_args(), vec!["run", "-d", "-p", "1122:22", "debian11"]);
  }

  #[test]
  fn run_args_include_volumes() {
    let mut docker = Docker::new("ubuntu2204");
    docker.set_volume("/tmp/sysroot", "/sysroot").unwrap();
    assert_eq!(
      docker.run_args(),
      vec!["run", "-d", "-p", "1122:22", "-v", "/tmp/sysroot:/sysroot", "ubuntu2204"]
    );
  }

  #[test]
  fn duplicate_volume_is_rejected() {
    let mut docker = Docker::default();
    docker.set_volume("/a", "/sysroot").unwrap();
    let err = docker.set_volume("/a", "/other").unwrap_err();
    assert!(matches!(err, DockerError::DuplicateVolume { .. }));
    assert_eq!(docker.volumes.len(), 1);
  }

  #[tokio::test]
  async fn teardown_without_start_is_reported() {
    let docker = Docker::default();
    assert!(matches!(docker.stop().await, Err(DockerError::UnknownContainer { .. })));
    assert!(matches!(docker.remove().await, Err(DockerError::UnknownContainer { .. })));
  }

  #[tokio::test]
  async fn run_records_container_id_and_tears_down() {
    let temp = TempDir::new().unwrap();
    let fake = fake_docker(temp.path(), "");
    let mut docker = Docker::new("debian11");
    docker.executable = fake.executable.clone();

    let id = docker.run().await.unwrap().to_string();
    assert_eq!(id, "f00dcafe1234");
    docker.stop_and_remove().await.unwrap();

    let calls = fake.calls();
    assert_eq!(calls[0], "run -d -p 1122:22 debian11");
    assert_eq!(calls[1], "stop f00dcafe1234");
    assert_eq!(calls[2], "rm f00dcafe1234");
  }

  #[tokio::test]
  async fn port_probe_reads_container_list() {
    let temp = TempDir::new().unwrap();
    let free = fake_docker(temp.path(), "");
    let mut docker = Docker::default();
    docker.executable = free.executable.clone();
    assert!(docker.is_port_available(1122).await.unwrap());
    docker.ensure_ports_available().await.unwrap();

    let busy_dir = TempDir::new().unwrap();
    let busy = fake_docker(busy_dir.path(), "abc123 0.0.0.0:1122->22/tcp");
    docker.executable = busy.executable.clone();
    assert!(!docker.is_port_available(1122).await.unwrap());
    assert!(matches!(
      docker.ensure_ports_available().await,
      Err(DockerError::PortInUse(1122))
    ));
  }

  #[tokio::test]
  async fn prerequisites_require_existing_volumes() {
    let temp = TempDir::new().unwrap();
    let fake = fake_docker(temp.path(), "");
    let mut docker = Docker::default();
    docker.executable = fake.executable.clone();
    docker.set_volume(temp.path().join("missing"), "/sysroot").unwrap();

    let err = docker.check_prerequisites().await.unwrap_err();
    assert!(matches!(err, DockerError::MissingVolume(_)));
  }

  #[tokio::test]
  async fn build_image_passes_dir_and_tag() {
    let temp = TempDir::new().unwrap();
    let fake = fake_docker(temp.path(), "");
    let log = temp.path().join("image_build.txt");

    build_image(&fake.executable, Path::new("/ctx/docker/debian11"), "debian11", &log)
      .await
      .unwrap();
    assert_eq!(fake.calls(), vec!["build /ctx/docker/debian11 --tag debian11"]);
  }
}
