//! Package identity, naming and archives.
//!
//! A [`Package`] is identified by `(name, is_debug)`. Its full archive name
//! encodes every field plus the [`PlatformString`]:
//!
//! ```text
//! ["lib"] <name> ["d"] ["-dev"] _ <version_tag> _ <machine>-<distro>-<release>
//! ```
//!
//! The short name drops the version and platform parts and is what sysroots
//! record in `built_packages.json`.

pub mod platform_string;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub use platform_string::{PlatformError, PlatformString, PlatformStringMode};

use crate::util::fs::relative_files;

const DEFAULT_PACKAGE_NAME: &str = "generic-package";
const DEFAULT_VERSION_TAG: &str = "v0.0.0";

static VERSION_TAG_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^v[0-9]+\.[0-9]+\.[0-9]+$").expect("static regex is valid"));

/// Errors from package validation and archive handling.
#[derive(Debug, Error)]
pub enum PackageError {
  #[error("IsDevLib is true but IsLibrary is false for package '{0}'")]
  DevLibWithoutLibrary(String),

  #[error("VersionTag '{tag}' of package '{name}' is not a valid version tag (expected vX.Y.Z)")]
  InvalidVersionTag { name: String, tag: String },

  #[error("package name cannot be empty")]
  EmptyName,

  #[error("package source directory does not exist: {0}")]
  SourceMissing(PathBuf),

  #[error("cannot write archive {path}: {source}")]
  Archive {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

/// One buildable package as described by the `Package` block of a config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Package {
  pub name: String,
  pub version_tag: String,
  pub is_library: bool,
  pub is_dev_lib: bool,
  pub is_debug: bool,

  /// Target platform. Never read from config files; the batch assigns the
  /// platform derived for the selected image.
  #[serde(skip)]
  pub platform_string: PlatformString,
}

impl Default for Package {
  fn default() -> Self {
    Self {
      name: DEFAULT_PACKAGE_NAME.to_string(),
      version_tag: DEFAULT_VERSION_TAG.to_string(),
      is_library: true,
      is_dev_lib: true,
      is_debug: false,
      platform_string: PlatformString::default(),
    }
  }
}

impl Package {
  /// Check the field invariants.
  ///
  /// # Errors
  ///
  /// Fails when `is_dev_lib` is set without `is_library`, when the version tag
  /// is not `vX.Y.Z`, or when the name is empty.
  pub fn validate(&self) -> Result<(), PackageError> {
    if self.is_dev_lib && !self.is_library {
      return Err(PackageError::DevLibWithoutLibrary(self.name.clone()));
    }
    if !VERSION_TAG_RE.is_match(&self.version_tag) {
      return Err(PackageError::InvalidVersionTag {
        name: self.name.clone(),
        tag: self.version_tag.clone(),
      });
    }
    if self.name.is_empty() {
      return Err(PackageError::EmptyName);
    }
    Ok(())
  }

  /// Name without version and platform, e.g. `libfood-dev`.
  pub fn short_name(&self) -> String {
    let mut name = String::new();
    if self.is_library {
      name.push_str("lib");
    }
    name.push_str(&self.name);
    if self.is_debug {
      name.push('d');
    }
    if self.is_dev_lib {
      name.push_str("-dev");
    }
    name
  }

  /// Full archive name without extension, e.g. `libfood-dev_v1.0.0_x86-64-debian-11`.
  pub fn full_name(&self) -> String {
    format!("{}_{}_{}", self.short_name(), self.version_tag, self.platform_string)
  }

  /// File name of the package archive.
  pub fn archive_file_name(&self) -> String {
    format!("{}.zip", self.full_name())
  }

  /// Zip every file under `source_dir` into `<output_dir>/<full_name>.zip`.
  ///
  /// Entry names are paths relative to `source_dir`. Symlinks are stored as
  /// symlink entries.
  pub fn create_archive(&self, source_dir: &Path, output_dir: &Path) -> Result<PathBuf, PackageError> {
    if !source_dir.is_dir() {
      return Err(PackageError::SourceMissing(source_dir.to_path_buf()));
    }
    std::fs::create_dir_all(output_dir)?;

    let archive_path = output_dir.join(self.archive_file_name());
    write_zip(source_dir, &archive_path).map_err(|source| PackageError::Archive {
      path: archive_path.clone(),
      source,
    })?;

    debug!(package = %self.name, archive = %archive_path.display(), "package archive created");
    Ok(archive_path)
  }
}

fn write_zip(source_dir: &Path, archive_path: &Path) -> Result<(), zip::result::ZipError> {
  let file = File::create(archive_path)?;
  let mut writer = ZipWriter::new(file);

  for relative in relative_files(source_dir)? {
    let path = source_dir.join(&relative);
    let name = relative.to_string_lossy().replace('\\', "/");
    let metadata = std::fs::symlink_metadata(&path)?;
    let options = SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .unix_permissions(unix_mode(&metadata));

    if metadata.file_type().is_symlink() {
      let target = std::fs::read_link(&path)?;
      writer.add_symlink(name, target.to_string_lossy().to_string(), options)?;
    } else {
      writer.start_file(name, options)?;
      let mut input = File::open(&path)?;
      io::copy(&mut input, &mut writer)?;
    }
  }

  writer.finish()?;
  Ok(())
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> u32 {
  0o644
}

/// Extract a package archive into `dest`, creating it if needed.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), PackageError> {
  std::fs::create_dir_all(dest)?;
  let file = File::open(archive_path)?;
  let mut archive = ZipArchive::new(file).map_err(|source| PackageError::Archive {
    path: archive_path.to_path_buf(),
    source,
  })?;
  archive.extract(dest).map_err(|source| PackageError::Archive {
    path: archive_path.to_path_buf(),
    source,
  })?;
  Ok(())
}
