//! Test fixtures: a scripted stand-in for docker, package contexts on disk,
//! and throwaway git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{Config, DockerMatrix, GitConfig};
use crate::package::Package;

/// A shell script standing in for an external tool. Every invocation
/// appends its arguments as one line to `calls_file`.
pub struct FakeTool {
  pub executable: PathBuf,
  pub calls_file: PathBuf,
}

impl FakeTool {
  /// Recorded invocations, oldest first. Empty when the tool never ran.
  pub fn calls(&self) -> Vec<String> {
    match std::fs::read_to_string(&self.calls_file) {
      Ok(content) => content.lines().map(str::to_string).collect(),
      Err(_) => Vec::new(),
    }
  }
}

/// Fake docker in `dir`. `run` prints a container ID and `container ...`
/// prints `container_ls_output`; everything else prints nothing.
#[cfg(unix)]
pub fn fake_docker(dir: &Path, container_ls_output: &str) -> FakeTool {
  use std::os::unix::fs::PermissionsExt;

  let executable = dir.join("fake-docker");
  let calls_file = dir.join("fake-docker.calls");
  let script = format!(
    r#"#!/bin/sh
echo "$*" >> "{calls}"
case "$1" in
  run) echo "f00dcafe1234" ;;
  container) echo "{ls}" ;;
esac
exit 0
"#,
    calls = calls_file.display(),
    ls = container_ls_output,
  );
  std::fs::write(&executable, script).unwrap();
  std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();
  FakeTool { executable, calls_file }
}

/// Empty package context under `root` with one image, `debian11`.
pub fn write_context(root: &Path) -> PathBuf {
  let image = root.join("docker/debian11");
  std::fs::create_dir_all(&image).unwrap();
  std::fs::write(image.join("Dockerfile"), "FROM debian:11\n").unwrap();
  std::fs::create_dir_all(root.join("package")).unwrap();
  root.to_path_buf()
}

/// Config of a `debian11` library package depending on `deps`.
pub fn package_config(name: &str, is_debug: bool, deps: &[&str]) -> Config {
  Config {
    git: GitConfig {
      uri: format!("https://git.example.com/{name}.git"),
      revision: "main".to_string(),
    },
    package: Package {
      name: name.to_string(),
      version_tag: "v1.0.0".to_string(),
      is_debug,
      ..Package::default()
    },
    docker_matrix: DockerMatrix {
      image_names: vec!["debian11".to_string()],
    },
    depends_on: deps.iter().map(|d| d.to_string()).collect(),
    ..Config::default()
  }
}

/// Write `config` to `package/<name>/<name>[_debug].json`.
pub fn add_package(root: &Path, config: &Config) -> PathBuf {
  let name = &config.package.name;
  let dir = root.join("package").join(name);
  std::fs::create_dir_all(&dir).unwrap();
  let file = if config.package.is_debug {
    format!("{name}_debug.json")
  } else {
    format!("{name}.json")
  };
  let path = dir.join(file);
  config.save(&path).unwrap();
  path
}

pub fn git_available() -> bool {
  Command::new("git")
    .arg("--version")
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
  let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
  assert!(status.success(), "git {args:?} failed");
}

/// Git repository at `dir` with one commit and a local identity.
pub fn init_git_repo(dir: &Path) {
  std::fs::create_dir_all(dir).unwrap();
  git(dir, &["init", "-q"]);
  git(dir, &["config", "user.email", "builder@example.com"]);
  git(dir, &["config", "user.name", "Builder"]);
  git(dir, &["config", "commit.gpgsign", "false"]);
  std::fs::write(dir.join("README.md"), "packages\n").unwrap();
  git(dir, &["add", "README.md"]);
  git(dir, &["commit", "-q", "-m", "init"]);
}
