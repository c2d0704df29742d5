//! Read-only access to a build context directory.
//!
//! ```text
//! <context>/
//! ├── docker/<image>/Dockerfile
//! └── package/<package>/*.json
//! ```
//!
//! Every JSON file under `package/<name>/` is one [`Config`] of that package,
//! usually one per build type.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{Config, ConfigError};
use crate::consts::{CONTEXT_DOCKER_DIR, CONTEXT_PACKAGE_DIR};
use crate::package::PlatformString;

const DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("{kind} path does not exist - {path}")]
  Missing { kind: &'static str, path: PathBuf },

  #[error("{kind} path is not a directory - {path}")]
  NotADirectory { kind: &'static str, path: PathBuf },

  #[error("package '{0}' does not exist, please check the name")]
  PackageMissing(String),

  #[error("docker image definition '{0}' does not exist, please check the name")]
  ImageMissing(String),

  #[error("dockerfile for the image '{0}' does not exist")]
  DockerfileMissing(String),

  #[error("package {0} dependencies do not have package with same build type")]
  BuildTypeMismatch(String),

  #[error("directory name ({dir}) is different from package name ({name})")]
  DirNameMismatch { dir: String, name: String },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("cannot list dir {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A context directory together with the operations reading it.
#[derive(Debug, Clone)]
pub struct ContextManager {
  context_path: PathBuf,
}

fn require_dir(kind: &'static str, path: &Path) -> Result<(), ContextError> {
  if !path.exists() {
    return Err(ContextError::Missing {
      kind,
      path: path.to_path_buf(),
    });
  }
  if !path.is_dir() {
    return Err(ContextError::NotADirectory {
      kind,
      path: path.to_path_buf(),
    });
  }
  Ok(())
}

/// Sorted entries of `dir` accepted by `filter`.
fn list_dir(dir: &Path, filter: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, ContextError> {
  let entries = std::fs::read_dir(dir).map_err(|source| ContextError::Io {
    path: dir.to_path_buf(),
    source,
  })?;
  let mut paths = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| ContextError::Io {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    if filter(&path) {
      paths.push(path);
    }
  }
  paths.sort();
  Ok(paths)
}

fn is_json(path: &Path) -> bool {
  path.is_file() && path.extension().is_some_and(|ext| ext == "json")
}

fn dir_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_default()
}

/// Remove repeated entries, keeping the first occurrence.
fn dedup_keep_first(paths: Vec<PathBuf>) -> Vec<PathBuf> {
  let mut seen = BTreeSet::new();
  paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

impl ContextManager {
  pub fn new(context_path: impl Into<PathBuf>) -> Self {
    Self {
      context_path: context_path.into(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.context_path
  }

  fn package_dir(&self) -> PathBuf {
    self.context_path.join(CONTEXT_PACKAGE_DIR)
  }

  fn docker_dir(&self) -> PathBuf {
    self.context_path.join(CONTEXT_DOCKER_DIR)
  }

  /// The context must be a directory holding `docker/` and `package/`.
  pub fn validate(&self) -> Result<(), ContextError> {
    require_dir("context", &self.context_path)?;
    require_dir("docker dir", &self.docker_dir())?;
    require_dir("package", &self.package_dir())
  }

  /// Every package directory with its config files, keyed by directory name.
  pub fn all_package_json_paths(&self) -> Result<BTreeMap<String, Vec<PathBuf>>, ContextError> {
    self.validate()?;
    let mut packages = BTreeMap::new();
    for dir in list_dir(&self.package_dir(), Path::is_dir)? {
      let configs = list_dir(&dir, is_json)?;
      packages.insert(dir_name(&dir), configs);
    }
    Ok(packages)
  }

  /// Config files of one package.
  pub fn package_json_paths(&self, package_name: &str) -> Result<Vec<PathBuf>, ContextError> {
    self.validate()?;
    let dir = self.package_dir().join(package_name);
    if !dir.is_dir() {
      return Err(ContextError::PackageMissing(package_name.to_string()));
    }
    list_dir(&dir, is_json)
  }

  /// Load every config of the context, each with its path.
  ///
  /// Configs that fail to load are logged and skipped.
  pub fn all_package_configs_with_paths(&self) -> Result<Vec<(PathBuf, Config)>, ContextError> {
    let mut configs = Vec::new();
    for path in self.all_package_json_paths()?.into_values().flatten() {
      match Config::load(&path) {
        Ok(config) => configs.push((path, config)),
        Err(e) => warn!(path = %path.display(), error = %e, "skipping config that cannot be loaded"),
      }
    }
    Ok(configs)
  }

  /// Load every config of the context, stamping `platform` on each package
  /// when given.
  pub fn all_package_configs(&self, platform: Option<&PlatformString>) -> Result<Vec<Config>, ContextError> {
    Ok(
      self
        .all_package_configs_with_paths()?
        .into_iter()
        .map(|(_, mut config)| {
          if let Some(platform) = platform {
            config.package.platform_string = platform.clone();
          }
          config
        })
        .collect(),
    )
  }

  /// Config paths of the package's dependencies, recursively, matching the
  /// build type of the config at `config_path`.
  fn dependency_json_paths(
    &self,
    config_path: &Path,
    visited: &mut BTreeSet<PathBuf>,
  ) -> Result<Vec<PathBuf>, ContextError> {
    let config = Config::load(config_path)?;
    visited.insert(config_path.to_path_buf());

    let mut matched = 0;
    let mut paths = Vec::new();
    for dependency in &config.depends_on {
      for dep_path in self.package_json_paths(dependency)? {
        let dep_config = Config::load(&dep_path)?;
        if dep_config.package.is_debug != config.package.is_debug {
          continue;
        }
        matched += 1;
        if visited.contains(&dep_path) {
          continue;
        }
        paths.push(dep_path.clone());
        paths.extend(self.dependency_json_paths(&dep_path, visited)?);
      }
    }

    if matched < config.depends_on.len() {
      return Err(ContextError::BuildTypeMismatch(config.package.name));
    }
    Ok(paths)
  }

  /// Config paths of the package followed by those of its whole dependency
  /// closure.
  pub fn package_with_deps_json_paths(&self, package_name: &str) -> Result<Vec<PathBuf>, ContextError> {
    let mut paths = self.package_json_paths(package_name)?;
    let mut visited = BTreeSet::new();
    let mut deps = Vec::new();
    for path in &paths {
      deps.extend(self.dependency_json_paths(path, &mut visited)?);
    }
    paths.extend(deps);
    Ok(paths)
  }

  fn collect_dependents(
    &self,
    all: &[(PathBuf, Config)],
    base: &Config,
    visited: &mut BTreeSet<String>,
    recursive: bool,
    out: &mut Vec<PathBuf>,
  ) -> Result<(), ContextError> {
    visited.insert(base.package.name.clone());
    for (_, config) in all {
      if config.package.name == base.package.name || config.package.is_debug != base.package.is_debug {
        continue;
      }
      if !config.depends_on.contains(&base.package.name) || visited.contains(&config.package.name) {
        continue;
      }
      debug!(package = %config.package.name, base = %base.package.name, "found dependent package");
      out.extend(self.package_with_deps_json_paths(&config.package.name)?);
      if recursive {
        self.collect_dependents(all, config, visited, true, out)?;
      }
    }
    Ok(())
  }

  /// Config paths of the packages depending on `package_name` (transitively
  /// when `recursive`), each with its own dependency closure.
  ///
  /// The result never contains `package_name` or its dependency closure and
  /// holds each path once.
  pub fn depends_on_json_paths(&self, package_name: &str, recursive: bool) -> Result<Vec<PathBuf>, ContextError> {
    let all = self.all_package_configs_with_paths()?;
    let mut visited = BTreeSet::new();
    let mut paths = Vec::new();
    for base_path in self.package_json_paths(package_name)? {
      let base = Config::load(&base_path)?;
      self.collect_dependents(&all, &base, &mut visited, recursive, &mut paths)?;
    }

    let exclude: BTreeSet<PathBuf> = self.package_with_deps_json_paths(package_name)?.into_iter().collect();
    paths.retain(|p| !exclude.contains(p));
    Ok(dedup_keep_first(paths))
  }

  /// Every image directory holding a Dockerfile, keyed by image name.
  pub fn all_image_dirs(&self) -> Result<BTreeMap<String, PathBuf>, ContextError> {
    self.validate()?;
    Ok(
      list_dir(&self.docker_dir(), |p| p.join(DOCKERFILE).is_file())?
        .into_iter()
        .map(|dir| (dir_name(&dir), dir))
        .collect(),
    )
  }

  /// Path of the image's Dockerfile.
  pub fn image_dockerfile_path(&self, image_name: &str) -> Result<PathBuf, ContextError> {
    self.validate()?;
    let dir = self.docker_dir().join(image_name);
    if !dir.is_dir() {
      return Err(ContextError::ImageMissing(image_name.to_string()));
    }
    let dockerfile = dir.join(DOCKERFILE);
    if !dockerfile.is_file() {
      return Err(ContextError::DockerfileMissing(image_name.to_string()));
    }
    Ok(dockerfile)
  }

  /// Every config under `package/<dir>/` must name package `<dir>`.
  pub fn check_consistency(&self) -> Result<(), ContextError> {
    self.validate()?;
    let package_dir = self.package_dir();
    for entry in WalkDir::new(&package_dir).min_depth(2).max_depth(2).sort_by_file_name() {
      let entry = entry.map_err(|e| ContextError::Io {
        path: package_dir.clone(),
        source: e.into(),
      })?;
      if !is_json(entry.path()) {
        continue;
      }
      let config = Config::load(entry.path())?;
      let dir = entry.path().parent().map(dir_name).unwrap_or_default();
      if config.package.name != dir {
        return Err(ContextError::DirNameMismatch {
          dir,
          name: config.package.name,
        });
      }
    }
    Ok(())
  }
}
