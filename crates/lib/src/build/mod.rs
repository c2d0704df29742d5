//! Per-(config, image) build units.
//!
//! A [`Build`] carries everything needed to compile one package inside one
//! toolchain image: the container description, SSH endpoint, source location,
//! CMake and make settings and the package identity. [`Build::build_chain`]
//! renders it into a [`BuildChain`] and [`Build::run`] executes that chain in
//! a fresh container through a [`ContainerExecutor`], then downloads the
//! install tree.

mod chain;
mod executor;
mod steps;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub use chain::{BuildChain, CommandLine};
pub use executor::{ContainerExecutor, ContainerState};
pub use steps::{
  CMake, EnvironmentVariables, Git, GitCheckout, GitClone, GitSubmoduleUpdate, GnuMake, StartupScript, Tar,
};

use crate::cleanup::{CleanupError, CleanupStack};
use crate::consts::{DOCKER_GIT_CLONE_DIR, DOCKER_INSTALL_DIR, DOCKER_SYSROOT_DIR};
use crate::docker::{Docker, DockerError};
use crate::logs::{BuildLogs, LogContext};
use crate::package::{Package, PackageError};
use crate::ssh::{SshCredentials, SshError};
use crate::sysroot::{Sysroot, SysrootError};

const INSTALL_PREFIX_DEFINE: &str = "CMAKE_INSTALL_PREFIX";
const PREFIX_PATH_DEFINE: &str = "CMAKE_PREFIX_PATH";

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("invalid environment variable name '{0}'")]
  InvalidEnvKey(String),

  #[error("invalid CMake variable name '{0}'")]
  InvalidCMakeVariable(String),

  #[error("do not specify {INSTALL_PREFIX_DEFINE}")]
  InstallPrefixSet,

  #[error("CMake define '{0}' is already set")]
  DuplicateDefine(String),

  #[error("git clone path cannot be empty")]
  EmptyClonePath,

  #[error("source directory cannot be empty")]
  EmptySourceDir,

  #[error("package directory exist. Please delete it: {0}")]
  LocalInstallExists(PathBuf),

  #[error("cannot {operation} container in state {state}")]
  InvalidState {
    operation: &'static str,
    state: ContainerState,
  },

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Docker(#[from] DockerError),

  #[error(transparent)]
  Ssh(#[from] SshError),

  #[error(transparent)]
  Sysroot(#[from] SysrootError),

  #[error(transparent)]
  Cleanup(#[from] CleanupError),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

/// Shared resources for running one build.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig<'a> {
  pub cleanup: &'a CleanupStack,
  pub logs: &'a BuildLogs,
  /// Empty local staging directory receiving the install tree.
  pub local_install_dir: &'a Path,
  /// Probe the mapped SSH port before starting the container.
  pub check_port: bool,
}

/// One package built inside one toolchain image.
#[derive(Debug, Clone)]
pub struct Build {
  pub env: EnvironmentVariables,
  pub docker: Docker,
  pub git: Git,
  pub cmake: CMake,
  pub gnu_make: GnuMake,
  pub ssh_credentials: SshCredentials,
  pub package: Package,
  pub startup_script: StartupScript,
  sysroot: Option<Sysroot>,
}

impl Build {
  /// Build of `package` in `image_name` with every default filled in.
  pub fn new(image_name: &str, package: Package) -> Self {
    Self {
      env: EnvironmentVariables::default(),
      docker: Docker::new(image_name),
      git: Git {
        clone_path: DOCKER_GIT_CLONE_DIR.to_string(),
        ..Git::default()
      },
      cmake: CMake {
        source_dir: DOCKER_GIT_CLONE_DIR.to_string(),
        ..CMake::default()
      },
      gnu_make: GnuMake::default(),
      ssh_credentials: SshCredentials::default(),
      package,
      startup_script: StartupScript::default(),
      sysroot: None,
    }
  }

  pub fn image_name(&self) -> &str {
    &self.docker.image_name
  }

  pub fn sysroot(&self) -> Option<&Sysroot> {
    self.sysroot.as_ref()
  }

  /// Attach a sysroot: it is mounted into the container and passed to CMake
  /// as `CMAKE_PREFIX_PATH`.
  pub fn set_sysroot(&mut self, sysroot: Sysroot) {
    self.sysroot = Some(sysroot);
  }

  /// Render the build into its ordered steps.
  ///
  /// # Errors
  ///
  /// Fails when the config already sets `CMAKE_INSTALL_PREFIX`, or sets
  /// `CMAKE_PREFIX_PATH` while a sysroot is attached.
  pub fn build_chain(&self) -> Result<BuildChain, BuildError> {
    let mut cmake = self.cmake.clone();
    if cmake.defines.contains_key(INSTALL_PREFIX_DEFINE) {
      return Err(BuildError::InstallPrefixSet);
    }
    cmake.set_define(INSTALL_PREFIX_DEFINE, DOCKER_INSTALL_DIR)?;
    if self.sysroot.is_some() {
      cmake.set_define(PREFIX_PATH_DEFINE, DOCKER_SYSROOT_DIR)?;
    }

    Ok(
      BuildChain::new()
        .with(self.startup_script.clone())
        .with(self.env.clone())
        .with(GitClone(self.git.clone()))
        .with(GitCheckout(self.git.clone()))
        .with(GitSubmoduleUpdate(self.git.clone()))
        .with(cmake)
        .with(self.gnu_make.clone()),
    )
  }

  /// The container to start, with the sysroot mounted when attached.
  pub fn container(&self) -> Result<Docker, BuildError> {
    let mut docker = self.docker.clone();
    if let Some(sysroot) = &self.sysroot {
      docker.set_volume(sysroot.path(), DOCKER_SYSROOT_DIR)?;
    }
    Ok(docker)
  }

  /// Create the local staging directory, which must not exist yet.
  pub fn prepare_local_install(dir: &Path) -> Result<(), BuildError> {
    if dir.exists() {
      return Err(BuildError::LocalInstallExists(dir.to_path_buf()));
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
  }

  /// Run the whole chain in a fresh container and download the install tree
  /// into `config.local_install_dir`.
  ///
  /// The container is always torn down. A teardown failure after a
  /// successful build is returned; after a failed build it is only logged.
  pub async fn run(&self, config: &RunConfig<'_>) -> Result<(), BuildError> {
    self.package.validate()?;
    let commands = self.build_chain()?.generate_commands()?;
    if let Some(sysroot) = &self.sysroot {
      sysroot.create_dir()?;
    }

    let image = self.image_name();
    let package = self.package.short_name();
    let chain_log = config
      .logs
      .context_file(image, Some(&package), LogContext::BuildChain)?;
    let tar_log = config.logs.context_file(image, Some(&package), LogContext::Tar)?;

    info!(package = %package, image = %image, "building package");
    let mut executor = ContainerExecutor::new(self.container()?, self.ssh_credentials.clone(), config.cleanup);
    executor.start(config.check_port).await?;

    let outcome = async {
      executor.execute(commands, &chain_log).await?;
      executor.retrieve(config.local_install_dir, &tar_log).await
    }
    .await;
    let teardown = executor.teardown().await;

    match (outcome, teardown) {
      (Ok(()), Ok(())) => {
        info!(package = %package, image = %image, "package built");
        Ok(())
      }
      (Ok(()), Err(e)) => Err(e),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(teardown_err)) => {
        warn!(package = %package, error = %teardown_err, "container teardown failed after build error");
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::package::PlatformString;
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn zlib() -> Build {
    let mut build = Build::new(
      "debian11",
      Package {
        name: "zlib".to_string(),
        version_tag: "v1.3.1".to_string(),
        ..Package::default()
      },
    );
    build.git.uri = "https://example.com/zlib.git".to_string();
    build.git.revision = "v1.3.1".to_string();
    build
  }

  #[test]
  fn chain_renders_every_step_in_order() {
    let mut build = zlib();
    build.env.env = BTreeMap::from([("CC".to_string(), "gcc".to_string())]);

    let commands = build.build_chain().unwrap().generate_commands().unwrap();
    assert_eq!(
      commands,
      vec![
        r#"test -f "/environment.sh" && . "/environment.sh""#,
        r#"export CC="gcc""#,
        "git clone --recursive https://example.com/zlib.git /git",
        "pushd /git",
        "git checkout v1.3.1",
        "popd",
        "pushd /git",
        "git submodule update --init --recursive",
        "popd",
        r#"cmake -DCMAKE_BUILD_TYPE="Debug" -DCMAKE_INSTALL_PREFIX="/INSTALL" /git"#,
        "make -j 10",
        "make install",
      ]
    );
  }

  #[test]
  fn sysroot_adds_prefix_path_and_volume() {
    let mut build = zlib();
    let sysroot = Sysroot::new("/work/install_sysroot", PlatformString::explicit("debian", "11", "x86-64"), false);
    build.set_sysroot(sysroot);

    let commands = build.build_chain().unwrap().generate_commands().unwrap();
    assert!(commands.contains(
      &r#"cmake -DCMAKE_BUILD_TYPE="Debug" -DCMAKE_INSTALL_PREFIX="/INSTALL" -DCMAKE_PREFIX_PATH="/sysroot" /git"#
        .to_string()
    ));

    let docker = build.container().unwrap();
    assert_eq!(
      docker.volumes.get(Path::new("/work/install_sysroot/x86-64-debian-11")),
      Some(&"/sysroot".to_string())
    );
    assert!(build.docker.volumes.is_empty());
  }

  #[test]
  fn config_must_not_set_install_prefix() {
    let mut build = zlib();
    build
      .cmake
      .defines
      .insert("CMAKE_INSTALL_PREFIX".to_string(), "/usr".to_string());
    assert!(matches!(build.build_chain(), Err(BuildError::InstallPrefixSet)));
  }

  #[test]
  fn local_install_dir_must_not_exist() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("localInstall");
    Build::prepare_local_install(&dir).unwrap();
    assert!(dir.is_dir());

    let err = Build::prepare_local_install(&dir).unwrap_err();
    assert!(matches!(err, BuildError::LocalInstallExists(_)));
    assert!(err.to_string().starts_with("package directory exist. Please delete it"));
  }

  #[tokio::test]
  async fn invalid_package_fails_before_any_container() {
    let temp = TempDir::new().unwrap();
    let fake = crate::util::testutil::fake_docker(temp.path(), "");
    let mut build = zlib();
    build.docker.executable = fake.executable.clone();
    build.package.is_library = false;

    let cleanup = CleanupStack::new();
    let logs = BuildLogs::new(&temp.path().join("log"));
    let config = RunConfig {
      cleanup: &cleanup,
      logs: &logs,
      local_install_dir: &temp.path().join("localInstall"),
      check_port: false,
    };
    let err = build.run(&config).await.unwrap_err();
    assert!(matches!(err, BuildError::Package(PackageError::DevLibWithoutLibrary(_))));
    assert!(fake.calls().is_empty());
    assert!(cleanup.is_empty());
  }
}
