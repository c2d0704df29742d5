use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn non_empty_sysroot_dir_is_rejected() {
  let env = TestEnv::new();
  env.write_file("sysroot/leftover.h", "");

  env
    .packager_cmd()
    .arg("create-sysroot")
    .arg("--sysroot-dir")
    .arg(env.path().join("sysroot"))
    .arg("--git-lfs")
    .arg(env.path().join("repo"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("given sysroot directory is not empty"));
}

#[test]
fn missing_repository_is_reported() {
  let env = TestEnv::new();

  env
    .packager_cmd()
    .arg("create-sysroot")
    .arg("--sysroot-dir")
    .arg(env.path().join("sysroot"))
    .arg("--git-lfs")
    .arg(env.path().join("repo"))
    .assert()
    .failure();
  assert!(!env.path().join("sysroot").exists());
}
