//! The three top-level modes: build packages, build images, create a sysroot.
//!
//! A [`BatchContext`] carries what every mode needs: the working paths, the
//! cleanup stack shared with the interrupt handler and the run's log
//! directory. Package builds are transactional at batch level: all archives
//! are committed together after the last package, and any failure restores
//! the repository working tree.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::build::{Build, BuildError, RunConfig};
use crate::cleanup::{ActionError, CleanupError, CleanupStack};
use crate::config::Config;
use crate::consts::{LOCAL_INSTALL_DIR_NAME, LOG_DIR_NAME, SYSROOT_DIR_NAME, WORKDIR_ENV};
use crate::context::{ContextError, ContextManager};
use crate::docker::{DOCKER_EXECUTABLE, Docker, DockerError, build_image};
use crate::logs::{BuildLogs, LogContext};
use crate::package::{PackageError, PlatformError, PlatformString, PlatformStringMode, unpack_archive};
use crate::repository::{GitLfsRepository, RepositoryError};
use crate::resolve::{BuildSelection, ResolveError, select};
use crate::ssh::SshCredentials;
use crate::sysroot::{BuiltPackages, Sysroot, SysrootError};
use crate::util::fs::is_dir_empty;

const RELEASE_DIR: &str = "release";
const DEBUG_DIR: &str = "debug";

#[derive(Debug, Error)]
pub enum BatchError {
  #[error("package context directory consistency check failed")]
  Inconsistent(#[source] ContextError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  #[error(transparent)]
  Repository(#[from] RepositoryError),

  #[error(transparent)]
  Sysroot(#[from] SysrootError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Archive(#[from] PackageError),

  #[error(transparent)]
  Cleanup(#[from] CleanupError),

  #[error("cannot build package '{name}' - {source}")]
  PackageFailed {
    name: String,
    #[source]
    source: Box<BatchError>,
  },

  #[error("--build-deps-on(-recursive) set but base package or its dependencies are not in sysroot")]
  DepsNotInSysroot,

  #[error("given sysroot directory is not empty: {0}")]
  SysrootNotEmpty(PathBuf),

  #[error("build failed for '{image}': {source}")]
  ImageBuild {
    image: String,
    #[source]
    source: DockerError,
  },

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BatchError + '_ {
  move |source| BatchError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Host directories a run works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
  /// Staging directory for one downloaded install tree.
  pub local_install: PathBuf,
  /// Base directory of every sysroot.
  pub sysroot: PathBuf,
  /// Root of the run log directories.
  pub log: PathBuf,
}

impl WorkPaths {
  pub fn new(base: &Path) -> Self {
    Self {
      local_install: base.join(LOCAL_INSTALL_DIR_NAME),
      sysroot: base.join(SYSROOT_DIR_NAME),
      log: base.join(LOG_DIR_NAME),
    }
  }

  /// Paths under `PACKAGER_WORKDIR` when set, the working directory
  /// otherwise.
  pub fn from_env() -> io::Result<Self> {
    let base = match std::env::var_os(WORKDIR_ENV) {
      Some(dir) if !dir.is_empty() => PathBuf::from(dir),
      _ => std::env::current_dir()?,
    };
    Ok(Self::new(&base))
  }
}

/// What to build in [`BatchContext::build_packages`].
#[derive(Debug, Clone)]
pub struct PackageBuildOptions {
  pub selection: BuildSelection,
  pub image_name: String,
  /// Git LFS repository receiving the archives.
  pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
  /// Full names of the built packages, in build order.
  pub built: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BatchContext {
  pub paths: WorkPaths,
  pub docker_executable: PathBuf,
  /// Probe the SSH port before starting containers.
  pub check_port: bool,
  /// Use this platform instead of deriving it from the image.
  pub platform_override: Option<PlatformString>,
  cleanup: CleanupStack,
  logs: BuildLogs,
}

impl BatchContext {
  pub fn new(paths: WorkPaths) -> Self {
    Self {
      logs: BuildLogs::new(&paths.log),
      paths,
      docker_executable: PathBuf::from(DOCKER_EXECUTABLE),
      check_port: true,
      platform_override: None,
      cleanup: CleanupStack::new(),
    }
  }

  pub fn cleanup(&self) -> &CleanupStack {
    &self.cleanup
  }

  pub fn logs(&self) -> &BuildLogs {
    &self.logs
  }

  /// Platform of `image_name`, read from a throwaway container unless
  /// overridden.
  pub async fn platform_for(&self, image_name: &str) -> Result<PlatformString, BatchError> {
    if let Some(platform) = &self.platform_override {
      return Ok(platform.clone());
    }
    let mut docker = Docker::new(image_name);
    docker.executable = self.docker_executable.clone();
    let mut platform = PlatformString::auto(PlatformStringMode::Auto);
    platform
      .derive(docker, &SshCredentials::default(), &self.cleanup)
      .await?;
    Ok(platform)
  }

  fn warn_non_empty_sysroots(&self, platform: &PlatformString) -> Result<(), BatchError> {
    for (is_debug, kind) in [(false, "release"), (true, "debug")] {
      let sysroot = Sysroot::new(&self.paths.sysroot, platform.clone(), is_debug);
      if !sysroot.is_empty()? {
        warn!(sysroot = %sysroot.path().display(), "sysroot {kind} directory is not empty - the package build may fail");
      }
    }
    Ok(())
  }

  /// `true` when the package and its whole dependency closure are recorded
  /// in `built_packages.json`.
  fn is_package_with_deps_in_sysroot(&self, context: &ContextManager, name: &str) -> Result<bool, BatchError> {
    let built = BuiltPackages::new(&self.paths.sysroot);
    for config in select(context, &BuildSelection::WithDeps(name.to_string()))? {
      if !built.contains(&config.package.short_name())? {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Build the selected packages for one image and commit the archives.
  ///
  /// Checks run before anything is written: context consistency, platform
  /// derivation, repository state and repository consistency. On any later
  /// failure the repository working tree is restored and the error returned.
  pub async fn build_packages(
    &self,
    context: &ContextManager,
    options: &PackageBuildOptions,
  ) -> Result<BuildSummary, BatchError> {
    info!(context = %context.path().display(), "checking context directory consistency");
    context.check_consistency().map_err(BatchError::Inconsistent)?;

    let image = options.image_name.as_str();
    let platform = self.platform_for(image).await?;
    info!(image = %image, platform = %platform, "platform resolved");

    let repo = GitLfsRepository::new(&options.output_dir);
    repo.check_prerequisites().await?;
    info!("checking Git Lfs directory consistency");
    repo.check_consistency(context, &platform, image)?;
    self.warn_non_empty_sysroots(&platform)?;

    if let BuildSelection::DependsOn {
      name,
      with_deps: false,
      ..
    } = &options.selection
      && !self.is_package_with_deps_in_sysroot(context, name)?
    {
      return Err(BatchError::DepsNotInSysroot);
    }
    let configs = select(context, &options.selection)?;

    let restore = {
      let repo = repo.clone();
      self.cleanup.push("restore package repository", move || async move {
        repo.restore_all_changes().await.map_err(ActionError::from)
      })
    };

    match self.build_configs(&configs, image, &platform, &repo).await {
      Ok(summary) => {
        let committed = repo.commit_all_changes().await;
        restore.run().await?;
        committed?;
        Ok(summary)
      }
      Err(e) => {
        if let Err(restore_err) = restore.run().await {
          warn!(error = %restore_err, "cannot restore package repository");
        }
        Err(e)
      }
    }
  }

  async fn build_configs(
    &self,
    configs: &[Config],
    image: &str,
    platform: &PlatformString,
    repo: &GitLfsRepository,
  ) -> Result<BuildSummary, BatchError> {
    let mut summary = BuildSummary::default();
    for config in configs {
      let builds = config.builds(image);
      if builds.is_empty() {
        continue;
      }
      for build in builds {
        let name = self
          .build_and_copy(build, platform, repo)
          .await
          .map_err(|e| BatchError::PackageFailed {
            name: config.package.name.clone(),
            source: Box::new(e),
          })?;
        summary.built.push(name);
      }
    }
    if summary.built.is_empty() {
      warn!(image = %image, "Nothing to build. Did you enter correct image name?");
    }
    Ok(summary)
  }

  /// Build one package, archive it into the repository and copy it into the
  /// sysroot. Returns the package's full name.
  async fn build_and_copy(
    &self,
    mut build: Build,
    platform: &PlatformString,
    repo: &GitLfsRepository,
  ) -> Result<String, BatchError> {
    build.package.platform_string = platform.clone();
    build.docker.executable = self.docker_executable.clone();
    let sysroot = Sysroot::new(&self.paths.sysroot, platform.clone(), build.package.is_debug);
    build.set_sysroot(sysroot.clone());
    let full_name = build.package.full_name();
    info!(package = %full_name, "build");

    let local_install = self.paths.local_install.clone();
    Build::prepare_local_install(&local_install)?;
    let staging = {
      let dir = local_install.clone();
      self.cleanup.push("remove local install directory", move || async move {
        tokio::fs::remove_dir_all(&dir).await.map_err(ActionError::from)
      })
    };

    let result = async {
      let config = RunConfig {
        cleanup: &self.cleanup,
        logs: &self.logs,
        local_install_dir: &local_install,
        check_port: self.check_port,
      };
      build.run(&config).await?;
      info!(package = %full_name, "copying to Git repository");
      repo.copy_to_repository(&build.package, &local_install)?;
      info!(package = %full_name, "copying to local sysroot directory");
      sysroot.copy_to_sysroot(&local_install, &build.package.short_name())?;
      Ok::<_, BatchError>(())
    }
    .await;
    let removed = staging.run().await;

    result?;
    removed?;
    info!(package = %full_name, "build OK");
    Ok(full_name)
  }

  /// Build one image, or every image of the context in name order.
  pub async fn build_images(&self, context: &ContextManager, name: Option<&str>) -> Result<Vec<String>, BatchError> {
    let images: Vec<(String, PathBuf)> = match name {
      Some(name) => {
        let dockerfile = context.image_dockerfile_path(name)?;
        let dir = dockerfile.parent().map(Path::to_path_buf).unwrap_or_default();
        vec![(name.to_string(), dir)]
      }
      None => context.all_image_dirs()?.into_iter().collect(),
    };

    let mut built = Vec::new();
    for (image, dir) in images {
      let log = self
        .logs
        .context_file(&image, None, LogContext::ImageBuild)
        .map_err(io_error(self.logs.dir()))?;
      build_image(&self.docker_executable, &dir, &image, &log)
        .await
        .map_err(|source| BatchError::ImageBuild {
          image: image.clone(),
          source,
        })?;
      info!(image = %image, "image built");
      built.push(image);
    }
    Ok(built)
  }

  /// Unpack every archive the repository holds for `image_name` into
  /// `<sysroot_dir>/release` or `<sysroot_dir>/debug`. Returns the number of
  /// archives unpacked.
  pub async fn create_sysroot(
    &self,
    context: &ContextManager,
    sysroot_dir: &Path,
    repo_dir: &Path,
    image_name: &str,
  ) -> Result<usize, BatchError> {
    if !is_dir_empty(sysroot_dir).map_err(io_error(sysroot_dir))? {
      return Err(BatchError::SysrootNotEmpty(sysroot_dir.to_path_buf()));
    }
    let repo = GitLfsRepository::new(repo_dir);
    repo.check_prerequisites().await?;

    let platform = self.platform_for(image_name).await?;
    info!("checking Git Lfs directory consistency");
    repo.check_consistency(context, &platform, image_name)?;

    info!(sysroot = %sysroot_dir.display(), "creating sysroot directory from packages");
    let mut unpacked = 0;
    for config in context.all_package_configs(Some(&platform))? {
      if !config.has_image(image_name) {
        continue;
      }
      let archive = repo.package_archive_path(&config.package);
      if !archive.is_file() {
        continue;
      }
      let dest = sysroot_dir.join(if config.package.is_debug { DEBUG_DIR } else { RELEASE_DIR });
      unpack_archive(&archive, &dest)?;
      unpacked += 1;
    }
    Ok(unpacked)
  }
}
