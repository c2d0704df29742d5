//! The `built_packages.json` record at the root of the sysroot directory.
//!
//! A flat JSON array of short package names, in copy order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::BUILT_PACKAGES_FILE;

use super::SysrootError;

/// Reader/writer for the built-packages record under one sysroot base directory.
#[derive(Debug, Clone)]
pub struct BuiltPackages {
  base_path: PathBuf,
}

impl BuiltPackages {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn path(&self) -> PathBuf {
    self.base_path.join(BUILT_PACKAGES_FILE)
  }

  /// Load the recorded names. A missing file is an empty record.
  pub fn load(&self) -> Result<Vec<String>, SysrootError> {
    let path = self.path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(SysrootError::ReadBuiltPackages { path, source: e }),
    };
    serde_json::from_str(&content).map_err(|source| SysrootError::ParseBuiltPackages { path, source })
  }

  pub fn contains(&self, short_name: &str) -> Result<bool, SysrootError> {
    Ok(self.load()?.iter().any(|name| name == short_name))
  }

  /// Append `short_name` and rewrite the record atomically.
  pub fn add(&self, short_name: &str) -> Result<(), SysrootError> {
    let mut packages = self.load()?;
    packages.push(short_name.to_string());
    write_atomic(&self.base_path, &self.path(), &packages).map_err(|source| SysrootError::WriteBuiltPackages {
      path: self.path(),
      source,
    })
  }
}

fn write_atomic(dir: &Path, path: &Path, packages: &[String]) -> io::Result<()> {
  fs::create_dir_all(dir)?;
  let temp_path = dir.join(format!("{BUILT_PACKAGES_FILE}.tmp"));
  let content = serde_json::to_string(packages).map_err(io::Error::other)?;
  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path)
}
