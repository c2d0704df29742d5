//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the package context and
/// serving as `PACKAGER_WORKDIR`, so staging, sysroot and log directories
/// never touch the real working directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Context with one image, `debian11`, and no packages.
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    env.write_file("ctx/docker/debian11/Dockerfile", "FROM debian:11\n");
    std::fs::create_dir_all(env.context_path().join("package")).unwrap();
    env
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn context_path(&self) -> PathBuf {
    self.path().join("ctx")
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Write `package/<dir>/<file>` with a config naming package `name`.
  pub fn write_package(&self, dir: &str, file: &str, name: &str) {
    let config = format!(
      r#"{{
  "Git": {{ "URI": "https://git.example.com/{name}.git", "Revision": "main" }},
  "Package": {{ "Name": "{name}", "VersionTag": "v1.0.0" }},
  "DockerMatrix": {{ "ImageNames": ["debian11"] }}
}}"#
    );
    self.write_file(&format!("ctx/package/{dir}/{file}"), &config);
  }

  /// Put a fake `docker` first on `PATH` that records its arguments.
  /// Returns the calls file.
  #[cfg(unix)]
  pub fn fake_docker(&self, cmd: &mut Command) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = self.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let calls = self.path().join("docker.calls");
    let script = format!("#!/bin/sh\necho \"$*\" >> \"{}\"\nexit 0\n", calls.display());
    let docker = bin.join("docker");
    std::fs::write(&docker, script).unwrap();
    std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();

    let path = std::env::var_os("PATH").unwrap_or_default();
    let mut dirs = vec![bin];
    dirs.extend(std::env::split_paths(&path));
    cmd.env("PATH", std::env::join_paths(dirs).unwrap());
    calls
  }

  /// Command for the packager binary with `--context` and an isolated
  /// working directory.
  pub fn packager_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("packager");
    cmd.env("PACKAGER_WORKDIR", self.path());
    cmd.arg("--context").arg(self.context_path());
    cmd
  }
}
