//! The Git LFS package repository.
//!
//! Archives live at
//! `<repo>/<distro>/<release>/<machine>/<package>/<full name>.zip`. A batch
//! writes any number of archives into the working tree and then either
//! commits them all at once or restores the tree to its last commit.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::consts::MAX_REPORTED_PATHS;
use crate::context::{ContextError, ContextManager};
use crate::package::{Package, PackageError, PlatformString};
use crate::util::fs::format_path_list;
use crate::util::process::{ProcessError, run_command};

/// Program used to drive the repository.
pub const GIT_EXECUTABLE: &str = "git";

const COMMIT_MESSAGE: &str = "Build packages";

#[derive(Debug, Error)]
pub enum RepositoryError {
  #[error("package repository '{0}' does not exist")]
  Missing(PathBuf),

  #[error("package repository '{0}' is not a git repository")]
  NotGitRepository(PathBuf),

  #[error("sorry, but the given git root does not have empty `git status`. clean up changes and try again")]
  DirtyWorkingTree,

  #[error("packages in Git Lfs are not subset of packages in Json definitions")]
  UnexpectedFiles { count: usize, examples: String },

  #[error(transparent)]
  Git(#[from] ProcessError),

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error("cannot read repository {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Outcome of a successful consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
  /// Expected archives present in the repository.
  pub present: BTreeSet<PathBuf>,
  /// Expected archives not yet in the repository.
  pub missing: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GitLfsRepository {
  path: PathBuf,
  pub git_executable: PathBuf,
}

impl GitLfsRepository {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      git_executable: PathBuf::from(GIT_EXECUTABLE),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  async fn git(&self, args: &[&str]) -> Result<String, ProcessError> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    run_command(&self.git_executable.to_string_lossy(), &args, Some(&self.path)).await
  }

  /// The repository must exist, be a git work tree, and have no pending
  /// changes.
  pub async fn check_prerequisites(&self) -> Result<(), RepositoryError> {
    if !self.path.exists() {
      return Err(RepositoryError::Missing(self.path.clone()));
    }
    if !self.path.join(".git").exists() {
      return Err(RepositoryError::NotGitRepository(self.path.clone()));
    }
    if !self.is_status_empty().await? {
      return Err(RepositoryError::DirtyWorkingTree);
    }
    Ok(())
  }

  pub async fn is_status_empty(&self) -> Result<bool, RepositoryError> {
    Ok(self.git(&["status", "-s"]).await?.is_empty())
  }

  /// Stage and commit everything in the working tree. A clean tree is left
  /// as is.
  pub async fn commit_all_changes(&self) -> Result<(), RepositoryError> {
    if self.is_status_empty().await? {
      info!(repo = %self.path.display(), "nothing to commit");
      return Ok(());
    }
    self.git(&["add", "*"]).await?;
    self.git(&["commit", "-m", COMMIT_MESSAGE]).await?;
    info!(repo = %self.path.display(), "changes committed");
    Ok(())
  }

  /// Drop every uncommitted change, including staged additions and
  /// untracked files.
  pub async fn restore_all_changes(&self) -> Result<(), RepositoryError> {
    self.git(&["restore", "--staged", "--worktree", "."]).await?;
    self.git(&["clean", "-f", "."]).await?;
    info!(repo = %self.path.display(), "changes restored");
    Ok(())
  }

  /// `<repo>/<distro>/<release>/<machine>`.
  pub fn platform_dir(&self, platform: &PlatformString) -> PathBuf {
    self
      .path
      .join(&platform.distro_name)
      .join(&platform.distro_release)
      .join(&platform.machine)
  }

  /// Directory holding every archive of `package` for its platform.
  pub fn package_dir(&self, package: &Package) -> PathBuf {
    self.platform_dir(&package.platform_string).join(&package.name)
  }

  pub fn package_archive_path(&self, package: &Package) -> PathBuf {
    self.package_dir(package).join(package.archive_file_name())
  }

  /// Archive `source_dir` into the package's directory.
  pub fn copy_to_repository(&self, package: &Package, source_dir: &Path) -> Result<PathBuf, RepositoryError> {
    let archive = package.create_archive(source_dir, &self.package_dir(package))?;
    info!(package = %package.name, archive = %archive.display(), "package copied to repository");
    Ok(archive)
  }

  /// Archive paths of every package of the context built in `image_name`,
  /// for `platform`.
  pub fn expected_archives(
    &self,
    context: &ContextManager,
    platform: &PlatformString,
    image_name: &str,
  ) -> Result<BTreeSet<PathBuf>, RepositoryError> {
    Ok(
      context
        .all_package_configs(Some(platform))?
        .iter()
        .filter(|config| config.has_image(image_name))
        .map(|config| self.package_archive_path(&config.package))
        .collect(),
    )
  }

  /// Reconcile the archives under the platform directory with the ones the
  /// context can produce for `image_name`.
  ///
  /// # Errors
  ///
  /// Returns [`RepositoryError::UnexpectedFiles`] when the repository holds
  /// any file the context does not describe. Expected archives that are
  /// absent are only logged.
  pub fn check_consistency(
    &self,
    context: &ContextManager,
    platform: &PlatformString,
    image_name: &str,
  ) -> Result<ConsistencyReport, RepositoryError> {
    let mut missing = self.expected_archives(context, platform, image_name)?;
    let mut present = BTreeSet::new();
    let mut unexpected = BTreeSet::new();

    let root = self.platform_dir(platform);
    if root.is_dir() {
      for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(|e| RepositoryError::Io {
          path: root.clone(),
          source: e.into(),
        })?;
        if entry.file_type().is_dir() {
          continue;
        }
        let path = entry.into_path();
        if missing.remove(&path) {
          present.insert(path);
        } else {
          unexpected.insert(path);
        }
      }
    }

    if !unexpected.is_empty() {
      let examples = format_path_list(&unexpected, MAX_REPORTED_PATHS);
      error!(
        count = unexpected.len(),
        "packages are not in Json definitions but are in Git Lfs (listing first {MAX_REPORTED_PATHS}):\n{examples}"
      );
      return Err(RepositoryError::UnexpectedFiles {
        count: unexpected.len(),
        examples,
      });
    }
    if !missing.is_empty() {
      warn!(
        count = missing.len(),
        "expected packages to be in git lfs (listing first {MAX_REPORTED_PATHS}):\n{}",
        format_path_list(&missing, MAX_REPORTED_PATHS)
      );
    }
    Ok(ConsistencyReport { present, missing })
  }
}
