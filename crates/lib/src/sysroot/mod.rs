//! Local sysroots fed to subsequent builds.
//!
//! Each `(platform, build type)` pair has its own directory under the sysroot
//! base (`install_sysroot/<platform>[_debug]`). Packages are copied in only if
//! none of their files already exists there, so a sysroot never has a file
//! silently replaced.

mod built_packages;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

pub use built_packages::BuiltPackages;

use crate::consts::MAX_REPORTED_PATHS;
use crate::package::PlatformString;
use crate::util::fs::{copy_tree, format_path_list, is_dir_empty, relative_files};

#[derive(Debug, Error)]
pub enum SysrootError {
  #[error("trying to overwrite {count} files in sysroot {sysroot}:\n{examples}")]
  Overwrite {
    sysroot: PathBuf,
    count: usize,
    examples: String,
  },

  #[error("failed to read built packages file {path}: {source}")]
  ReadBuiltPackages {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse built packages file {path}: {source}")]
  ParseBuiltPackages {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write built packages file {path}: {source}")]
  WriteBuiltPackages {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cannot copy {from} into sysroot: {source}")]
  Copy {
    from: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("I/O error on sysroot {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One sysroot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysroot {
  base_path: PathBuf,
  platform: PlatformString,
  is_debug: bool,
}

impl Sysroot {
  /// `base_path` is the directory holding every sysroot (`install_sysroot`).
  pub fn new(base_path: impl Into<PathBuf>, platform: PlatformString, is_debug: bool) -> Self {
    Self {
      base_path: base_path.into(),
      platform,
      is_debug,
    }
  }

  pub fn is_debug(&self) -> bool {
    self.is_debug
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  /// `<base>/<platform>` or `<base>/<platform>_debug`.
  pub fn path(&self) -> PathBuf {
    let mut name = self.platform.to_string();
    if self.is_debug {
      name.push_str("_debug");
    }
    self.base_path.join(name)
  }

  pub fn create_dir(&self) -> Result<PathBuf, SysrootError> {
    let path = self.path();
    std::fs::create_dir_all(&path).map_err(|source| SysrootError::Io {
      path: path.clone(),
      source,
    })?;
    Ok(path)
  }

  /// `true` when the directory is missing or has no entries.
  pub fn is_empty(&self) -> Result<bool, SysrootError> {
    let path = self.path();
    is_dir_empty(&path).map_err(|source| SysrootError::Io { path, source })
  }

  pub fn built_packages(&self) -> BuiltPackages {
    BuiltPackages::new(&self.base_path)
  }

  pub fn is_package_in_sysroot(&self, short_name: &str) -> Result<bool, SysrootError> {
    self.built_packages().contains(short_name)
  }

  /// Relative paths present both under `source` and in the sysroot.
  pub fn overlapping_files(&self, source: &Path) -> Result<BTreeSet<PathBuf>, SysrootError> {
    let io_err = |path: &Path| {
      let path = path.to_path_buf();
      move |source: io::Error| SysrootError::Io { path, source }
    };
    let incoming = relative_files(source).map_err(io_err(source))?;
    let sysroot_path = self.path();
    let existing = relative_files(&sysroot_path).map_err(io_err(&sysroot_path))?;
    Ok(incoming.intersection(&existing).cloned().collect())
  }

  /// Copy the tree under `source` into the sysroot and record `short_name`.
  ///
  /// # Errors
  ///
  /// Returns [`SysrootError::Overwrite`] before copying anything when any
  /// relative file path already exists in the sysroot.
  pub fn copy_to_sysroot(&self, source: &Path, short_name: &str) -> Result<(), SysrootError> {
    let overlap = self.overlapping_files(source)?;
    if !overlap.is_empty() {
      let examples = format_path_list(&overlap, MAX_REPORTED_PATHS);
      error!(
        sysroot = %self.path().display(),
        count = overlap.len(),
        "trying to overwrite files in sysroot - sysroot consistency interrupted"
      );
      return Err(SysrootError::Overwrite {
        sysroot: self.path(),
        count: overlap.len(),
        examples,
      });
    }

    copy_tree(source, &self.path()).map_err(|e| SysrootError::Copy {
      from: source.to_path_buf(),
      source: e,
    })?;
    self.built_packages().add(short_name)?;

    info!(package = %short_name, sysroot = %self.path().display(), "package copied to sysroot");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn platform() -> PlatformString {
    PlatformString::explicit("debian", "11", "x86-64")
  }

  fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    relative_files(root)
      .unwrap()
      .into_iter()
      .map(|rel| {
        let content = fs::read(root.join(&rel)).unwrap();
        (rel, content)
      })
      .collect()
  }

  #[test]
  fn path_encodes_platform_and_build_type() {
    let release = Sysroot::new("/work/install_sysroot", platform(), false);
    let debug = Sysroot::new("/work/install_sysroot", platform(), true);
    assert_eq!(release.path(), PathBuf::from("/work/install_sysroot/x86-64-debian-11"));
    assert_eq!(debug.path(), PathBuf::from("/work/install_sysroot/x86-64-debian-11_debug"));
  }

  #[test]
  fn copy_into_empty_sysroot_records_package() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("localInstall");
    write(&source, "include/zlib.h", "z");
    write(&source, "lib/libz.a", "a");

    let sysroot = Sysroot::new(temp.path().join("install_sysroot"), platform(), false);
    assert!(sysroot.is_empty().unwrap());

    sysroot.copy_to_sysroot(&source, "libzlib-dev").unwrap();

    assert!(!sysroot.is_empty().unwrap());
    assert_eq!(fs::read_to_string(sysroot.path().join("include/zlib.h")).unwrap(), "z");
    assert!(sysroot.is_package_in_sysroot("libzlib-dev").unwrap());
  }

  #[test]
  fn overlapping_copy_is_rejected_and_sysroot_unchanged() {
    let temp = TempDir::new().unwrap();
    let sysroot = Sysroot::new(temp.path().join("install_sysroot"), platform(), false);
    let root = sysroot.create_dir().unwrap();
    write(&root, "include/common.h", "original");
    write(&root, "lib/libother.a", "other");
    let before = snapshot(&root);

    let source = temp.path().join("localInstall");
    write(&source, "include/common.h", "replacement");
    write(&source, "include/new.h", "new");

    let err = sysroot.copy_to_sysroot(&source, "libnew-dev").unwrap_err();
    match &err {
      SysrootError::Overwrite { count, examples, .. } => {
        assert_eq!(*count, 1);
        assert!(examples.contains("include/common.h"));
      }
      other => panic!("unexpected error: {other}"),
    }

    assert_eq!(snapshot(&root), before);
    assert!(!root.join("include/new.h").exists());
    assert!(!sysroot.is_package_in_sysroot("libnew-dev").unwrap());
  }

  #[test]
  fn release_and_debug_sysroots_do_not_overlap() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("install_sysroot");
    let source = temp.path().join("localInstall");
    write(&source, "include/zlib.h", "z");

    Sysroot::new(&base, platform(), false)
      .copy_to_sysroot(&source, "libzlib-dev")
      .unwrap();
    Sysroot::new(&base, platform(), true)
      .copy_to_sysroot(&source, "libzlibd-dev")
      .unwrap();

    let record = BuiltPackages::new(&base).load().unwrap();
    assert_eq!(record, vec!["libzlib-dev", "libzlibd-dev"]);
  }
}
