use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn unknown_image_fails() {
  let env = TestEnv::new();

  env
    .packager_cmd()
    .args(["build-image", "--name", "fedora40"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("docker image definition 'fedora40' does not exist"));
}

#[test]
fn all_and_name_are_exclusive() {
  let env = TestEnv::new();

  env
    .packager_cmd()
    .args(["build-image", "--all", "--name", "debian11"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--all cannot be combined with --name"));
}

#[cfg(unix)]
#[test]
fn all_images_are_built_in_name_order() {
  let env = TestEnv::new();
  env.write_file("ctx/docker/alpine3/Dockerfile", "FROM alpine:3\n");

  let mut cmd = env.packager_cmd();
  let calls = env.fake_docker(&mut cmd);
  cmd
    .args(["build-image", "--all"])
    .assert()
    .success()
    .stdout(predicate::str::contains("2 image(s) built"));

  let calls = std::fs::read_to_string(calls).unwrap();
  let lines: Vec<&str> = calls.lines().collect();
  assert_eq!(lines.len(), 2);
  assert!(lines[0].starts_with("build ") && lines[0].ends_with("--tag alpine3"));
  assert!(lines[1].ends_with("--tag debian11"));
  assert!(env.path().join("log").is_dir());
}
