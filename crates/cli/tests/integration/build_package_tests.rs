use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn directory_name_mismatch_fails_before_docker() {
  let env = TestEnv::new();
  env.write_package("zlib", "zlib.json", "libz");

  env
    .packager_cmd()
    .args(["build-package", "--all", "--image-name", "debian11", "--output-dir"])
    .arg(env.path().join("repo"))
    .assert()
    .failure()
    .stderr(predicate::str::contains(
      "directory name (zlib) is different from package name (libz)",
    ));
  assert!(!env.path().join("localInstall").exists());
}

#[test]
fn output_dir_is_required() {
  let env = TestEnv::new();

  env
    .packager_cmd()
    .args(["build-package", "--name", "zlib", "--image-name", "debian11"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--output-dir"));
}

#[test]
fn selection_and_output_dir_are_logged() {
  let env = TestEnv::new();
  env.write_package("zlib", "zlib.json", "libz");
  let repo = env.path().join("repo").display().to_string();

  env
    .packager_cmd()
    .args(["--verbose", "build-package", "--name", "zlib", "--build-deps", "--build-deps-on"])
    .args(["--image-name", "debian11", "--output-dir"])
    .arg(env.path().join("repo"))
    .env_remove("RUST_LOG")
    .assert()
    .failure()
    .stderr(predicate::str::contains("building packages"))
    .stderr(predicate::str::contains("with_deps: true"))
    .stderr(predicate::str::contains(repo))
    .stderr(predicate::str::contains("work paths resolved"));
}
