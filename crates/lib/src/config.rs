//! Package build configuration files.
//!
//! One JSON file describes one package in one build type:
//!
//! ```json
//! {
//!   "Env": { "CC": "gcc" },
//!   "Git": { "URI": "https://example.com/zlib.git", "Revision": "v1.3.1" },
//!   "Build": { "CMake": { "Defines": { "BUILD_SHARED_LIBS": "ON" }, "CMakeListDir": "./" } },
//!   "Package": { "Name": "zlib", "VersionTag": "v1.3.1", "IsDebug": false },
//!   "DockerMatrix": { "ImageNames": ["debian11", "ubuntu2204"] },
//!   "DependsOn": []
//! }
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::Build;
use crate::package::Package;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("couldn't read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("couldn't load JSON config from {path} path - {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GitConfig {
  #[serde(rename = "URI")]
  pub uri: String,
  pub revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CMakeConfig {
  pub defines: BTreeMap<String, String>,
  /// Directory of the top `CMakeLists.txt` relative to the sources.
  #[serde(rename = "CMakeListDir", skip_serializing_if = "Option::is_none")]
  pub cmake_list_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BuildConfig {
  #[serde(rename = "CMake", skip_serializing_if = "Option::is_none")]
  pub cmake: Option<CMakeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DockerMatrix {
  pub image_names: Vec<String>,
}

/// Build recipe of one package in one build type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
  pub env: BTreeMap<String, String>,
  pub git: GitConfig,
  pub build: BuildConfig,
  pub package: Package,
  pub docker_matrix: DockerMatrix,
  pub depends_on: Vec<String>,
}

impl Config {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  pub fn save(&self, path: &Path) -> io::Result<()> {
    let content = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
    std::fs::write(path, content)
  }

  /// `true` when the package is built in `image_name`.
  pub fn has_image(&self, image_name: &str) -> bool {
    self.docker_matrix.image_names.iter().any(|i| i == image_name)
  }

  /// One [`Build`] per image in the docker matrix.
  ///
  /// An empty `image_name` selects every image; otherwise only the matching
  /// one. Values set in the config override the build defaults; empty values
  /// keep them.
  pub fn builds(&self, image_name: &str) -> Vec<Build> {
    self
      .docker_matrix
      .image_names
      .iter()
      .filter(|image| image_name.is_empty() || image.as_str() == image_name)
      .map(|image| self.build_for(image))
      .collect()
  }

  fn build_for(&self, image_name: &str) -> Build {
    let mut build = Build::new(image_name, self.package.clone());
    build.env.env = self.env.clone();
    if !self.git.uri.is_empty() {
      build.git.uri = self.git.uri.clone();
    }
    if !self.git.revision.is_empty() {
      build.git.revision = self.git.revision.clone();
    }
    if let Some(cmake) = &self.build.cmake {
      build
        .cmake
        .defines
        .extend(cmake.defines.iter().map(|(k, v)| (k.clone(), v.clone())));
      if let Some(dir) = cmake.cmake_list_dir.as_ref().filter(|d| !d.is_empty()) {
        build.cmake.cmake_list_dir = dir.clone();
      }
    }
    build
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const ZLIB: &str = r#"{
    "Env": { "CFLAGS": "-O2" },
    "Git": { "URI": "https://example.com/zlib.git", "Revision": "v1.3.1" },
    "Build": {
      "CMake": {
        "Defines": { "CMAKE_BUILD_TYPE": "Release", "BUILD_SHARED_LIBS": "ON" },
        "CMakeListDir": "./contrib"
      }
    },
    "Package": { "Name": "zlib", "VersionTag": "v1.3.1", "IsLibrary": true, "IsDevLib": true, "IsDebug": false },
    "DockerMatrix": { "ImageNames": ["debian11", "ubuntu2204"] },
    "DependsOn": ["openssl"]
  }"#;

  #[test]
  fn parses_pascal_case_fields() {
    let config = Config::from_json(ZLIB).unwrap();
    assert_eq!(config.git.uri, "https://example.com/zlib.git");
    assert_eq!(config.package.name, "zlib");
    assert_eq!(config.depends_on, vec!["openssl"]);
    assert_eq!(config.docker_matrix.image_names, vec!["debian11", "ubuntu2204"]);
    assert_eq!(
      config.build.cmake.as_ref().unwrap().cmake_list_dir.as_deref(),
      Some("./contrib")
    );
  }

  #[test]
  fn builds_filter_by_image() {
    let config = Config::from_json(ZLIB).unwrap();
    assert_eq!(config.builds("").len(), 2);
    let builds = config.builds("ubuntu2204");
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].image_name(), "ubuntu2204");
    assert!(config.builds("fedora40").is_empty());
  }

  #[test]
  fn config_values_override_defaults() {
    let config = Config::from_json(ZLIB).unwrap();
    let build = &config.builds("debian11")[0];
    assert_eq!(build.git.revision, "v1.3.1");
    assert_eq!(build.git.clone_path, "/git");
    assert_eq!(build.cmake.defines["CMAKE_BUILD_TYPE"], "Release");
    assert_eq!(build.cmake.defines["BUILD_SHARED_LIBS"], "ON");
    assert_eq!(build.cmake.cmake_list_dir, "./contrib");
    assert_eq!(build.env.env["CFLAGS"], "-O2");
  }

  #[test]
  fn missing_sections_keep_defaults() {
    let config = Config::from_json(r#"{ "Package": { "Name": "tiny" }, "DockerMatrix": { "ImageNames": ["debian11"] } }"#)
      .unwrap();
    let build = &config.builds("debian11")[0];
    assert_eq!(build.cmake.defines["CMAKE_BUILD_TYPE"], "Debug");
    assert_eq!(build.cmake.cmake_list_dir, "./");
    assert_eq!(build.package.version_tag, "v0.0.0");
    assert!(config.depends_on.is_empty());
  }

  #[test]
  fn load_reports_path_on_bad_json() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.json"));
  }

  #[test]
  fn save_then_load_preserves_config() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("zlib.json");
    let config = Config::from_json(ZLIB).unwrap();
    config.save(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap(), config);
  }
}
