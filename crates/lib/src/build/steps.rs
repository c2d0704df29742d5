//! The individual build-chain steps.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::BuildError;
use super::chain::CommandLine;
use crate::consts::{DEFAULT_MAKE_JOBS, STARTUP_SCRIPT_PATH};

static ENV_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z]+").expect("static regex is valid"));

static CMAKE_VARIABLE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z_]+$").expect("static regex is valid"));

fn quote(value: &str) -> String {
  format!("\"{value}\"")
}

/// Join a relative POSIX path onto `base`, dropping `.` segments.
fn join_posix(base: &str, relative: &str) -> String {
  let mut path = base.trim_end_matches('/').to_string();
  for segment in relative.split('/').filter(|s| !s.is_empty() && *s != ".") {
    path.push('/');
    path.push_str(segment);
  }
  if path.is_empty() { "/".to_string() } else { path }
}

/// Sources the image's environment script when it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupScript {
  pub path: String,
}

impl Default for StartupScript {
  fn default() -> Self {
    Self {
      path: STARTUP_SCRIPT_PATH.to_string(),
    }
  }
}

impl CommandLine for StartupScript {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    let path = quote(&self.path);
    Ok(vec![format!("test -f {path} && . {path}")])
  }
}

/// `export KEY="VALUE"` for every configured variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariables {
  pub env: BTreeMap<String, String>,
}

impl CommandLine for EnvironmentVariables {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    self
      .env
      .iter()
      .map(|(key, value)| {
        if !ENV_KEY_RE.is_match(key) {
          return Err(BuildError::InvalidEnvKey(key.clone()));
        }
        Ok(format!("export {key}={}", quote(value)))
      })
      .collect()
  }
}

/// Source repository of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Git {
  pub uri: String,
  pub revision: String,
  /// Clone destination inside the container.
  pub clone_path: String,
}

impl Git {
  fn require_clone_path(&self) -> Result<&str, BuildError> {
    if self.clone_path.is_empty() {
      return Err(BuildError::EmptyClonePath);
    }
    Ok(&self.clone_path)
  }
}

#[derive(Debug, Clone)]
pub struct GitClone(pub Git);

impl CommandLine for GitClone {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    let path = self.0.require_clone_path()?;
    Ok(vec![format!("git clone --recursive {} {}", self.0.uri, path)])
  }
}

#[derive(Debug, Clone)]
pub struct GitCheckout(pub Git);

impl CommandLine for GitCheckout {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    let path = self.0.require_clone_path()?;
    Ok(vec![
      format!("pushd {path}"),
      format!("git checkout {}", self.0.revision),
      "popd".to_string(),
    ])
  }
}

#[derive(Debug, Clone)]
pub struct GitSubmoduleUpdate(pub Git);

impl CommandLine for GitSubmoduleUpdate {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    let path = self.0.require_clone_path()?;
    Ok(vec![
      format!("pushd {path}"),
      "git submodule update --init --recursive".to_string(),
      "popd".to_string(),
    ])
  }
}

/// CMake configure step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMake {
  pub defines: BTreeMap<String, String>,
  /// Directory of the top `CMakeLists.txt`, relative to the sources.
  pub cmake_list_dir: String,
  /// Source root inside the container.
  pub source_dir: String,
}

impl Default for CMake {
  fn default() -> Self {
    Self {
      defines: BTreeMap::from([("CMAKE_BUILD_TYPE".to_string(), "Debug".to_string())]),
      cmake_list_dir: "./".to_string(),
      source_dir: String::new(),
    }
  }
}

impl CMake {
  /// Add a define that must not already be present.
  pub fn set_define(&mut self, key: &str, value: &str) -> Result<(), BuildError> {
    if self.defines.contains_key(key) {
      return Err(BuildError::DuplicateDefine(key.to_string()));
    }
    self.defines.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

impl CommandLine for CMake {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    if self.source_dir.is_empty() {
      return Err(BuildError::EmptySourceDir);
    }
    let mut line = vec!["cmake".to_string()];
    for (key, value) in &self.defines {
      if !CMAKE_VARIABLE_RE.is_match(key) {
        return Err(BuildError::InvalidCMakeVariable(key.clone()));
      }
      line.push(format!("-D{key}={}", quote(value)));
    }
    line.push(join_posix(&self.source_dir, &self.cmake_list_dir));
    Ok(vec![line.join(" ")])
  }
}

/// `make -j N` followed by `make install`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnuMake {
  pub jobs: u32,
}

impl Default for GnuMake {
  fn default() -> Self {
    Self { jobs: DEFAULT_MAKE_JOBS }
  }
}

impl CommandLine for GnuMake {
  fn command_lines(&self) -> Result<Vec<String>, BuildError> {
    Ok(vec![format!("make -j {}", self.jobs), "make install".to_string()])
  }
}

/// Archives a directory's content into a tar file stored in that directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tar {
  pub archive_name: String,
  pub source_dir: String,
}

impl Tar {
  pub fn new(archive_name: impl Into<String>, source_dir: impl Into<String>) -> Self {
    Self {
      archive_name: archive_name.into(),
      source_dir: source_dir.into(),
    }
  }

  /// The single `tar` invocation.
  pub fn command_line(&self) -> String {
    format!(
      "tar cvf {} -C {} .",
      join_posix(&self.source_dir, &self.archive_name),
      self.source_dir
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn git() -> Git {
    Git {
      uri: "https://example.com/zlib.git".to_string(),
      revision: "v1.3.1".to_string(),
      clone_path: "/git".to_string(),
    }
  }

  #[test]
  fn startup_script_is_sourced_only_if_present() {
    assert_eq!(
      StartupScript::default().command_lines().unwrap(),
      vec![r#"test -f "/environment.sh" && . "/environment.sh""#]
    );
  }

  #[test]
  fn env_exports_are_quoted_and_sorted() {
    let env = EnvironmentVariables {
      env: BTreeMap::from([
        ("PATH".to_string(), "/opt/bin:$PATH".to_string()),
        ("CC".to_string(), "gcc-12".to_string()),
      ]),
    };
    assert_eq!(
      env.command_lines().unwrap(),
      vec![r#"export CC="gcc-12""#, r#"export PATH="/opt/bin:$PATH""#]
    );
  }

  #[test]
  fn env_key_must_start_alphanumeric() {
    let env = EnvironmentVariables {
      env: BTreeMap::from([("_HIDDEN".to_string(), "x".to_string())]),
    };
    assert!(matches!(env.command_lines(), Err(BuildError::InvalidEnvKey(k)) if k == "_HIDDEN"));
  }

  #[test]
  fn git_steps_render() {
    assert_eq!(
      GitClone(git()).command_lines().unwrap(),
      vec!["git clone --recursive https://example.com/zlib.git /git"]
    );
    assert_eq!(
      GitCheckout(git()).command_lines().unwrap(),
      vec!["pushd /git", "git checkout v1.3.1", "popd"]
    );
    assert_eq!(
      GitSubmoduleUpdate(git()).command_lines().unwrap(),
      vec!["pushd /git", "git submodule update --init --recursive", "popd"]
    );
  }

  #[test]
  fn git_steps_require_clone_path() {
    let mut g = git();
    g.clone_path.clear();
    assert!(matches!(GitClone(g.clone()).command_lines(), Err(BuildError::EmptyClonePath)));
    assert!(matches!(GitCheckout(g.clone()).command_lines(), Err(BuildError::EmptyClonePath)));
    assert!(matches!(GitSubmoduleUpdate(g).command_lines(), Err(BuildError::EmptyClonePath)));
  }

  #[test]
  fn cmake_renders_defines_and_source() {
    let mut cmake = CMake {
      source_dir: "/git".to_string(),
      ..CMake::default()
    };
    cmake.set_define("CMAKE_INSTALL_PREFIX", "/INSTALL").unwrap();
    assert_eq!(
      cmake.command_lines().unwrap(),
      vec![r#"cmake -DCMAKE_BUILD_TYPE="Debug" -DCMAKE_INSTALL_PREFIX="/INSTALL" /git"#]
    );
  }

  #[test]
  fn cmake_list_dir_is_joined() {
    let cmake = CMake {
      source_dir: "/git".to_string(),
      cmake_list_dir: "./src/lib/".to_string(),
      defines: BTreeMap::new(),
    };
    assert_eq!(cmake.command_lines().unwrap(), vec!["cmake /git/src/lib"]);
  }

  #[test]
  fn cmake_rejects_invalid_variable_names() {
    let mut cmake = CMake {
      source_dir: "/git".to_string(),
      ..CMake::default()
    };
    cmake.defines.insert("BAD-NAME".to_string(), "1".to_string());
    assert!(matches!(
      cmake.command_lines(),
      Err(BuildError::InvalidCMakeVariable(name)) if name == "BAD-NAME"
    ));
  }

  #[test]
  fn cmake_requires_source_dir() {
    assert!(matches!(CMake::default().command_lines(), Err(BuildError::EmptySourceDir)));
  }

  #[test]
  fn set_define_rejects_duplicates() {
    let mut cmake = CMake::default();
    let err = cmake.set_define("CMAKE_BUILD_TYPE", "Release").unwrap_err();
    assert!(matches!(err, BuildError::DuplicateDefine(_)));
    assert_eq!(cmake.defines["CMAKE_BUILD_TYPE"], "Debug");
  }

  #[test]
  fn make_builds_then_installs() {
    assert_eq!(
      GnuMake::default().command_lines().unwrap(),
      vec!["make -j 10", "make install"]
    );
  }

  #[test]
  fn tar_archives_install_dir_in_place() {
    let tar = Tar::new("install_arch.tar", "/INSTALL");
    assert_eq!(tar.command_line(), "tar cvf /INSTALL/install_arch.tar -C /INSTALL .");
  }

  #[test]
  fn join_posix_cases() {
    assert_eq!(join_posix("/git", "./"), "/git");
    assert_eq!(join_posix("/git/", "sub/dir"), "/git/sub/dir");
    assert_eq!(join_posix("/git", ""), "/git");
  }
}
