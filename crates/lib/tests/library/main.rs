//! End-to-end checks of the public API on a context written to disk: config
//! loading, dependency resolution and build chain rendering. No container is
//! started.

use std::path::Path;

use packager_lib::build::BuildError;
use packager_lib::context::ContextManager;
use packager_lib::package::PlatformString;
use packager_lib::resolve::{BuildSelection, ResolveError, select};
use packager_lib::sysroot::Sysroot;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
  let path = root.join(relative);
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, content).unwrap();
}

/// `app` depends on `zlib`; `zlib` overrides the build type and points
/// CMake at a subdirectory.
fn context() -> TempDir {
  let temp = TempDir::new().unwrap();
  let root = temp.path();
  write(root, "docker/debian11/Dockerfile", "FROM debian:11\n");
  write(
    root,
    "package/zlib/zlib.json",
    r#"{
  "Env": { "CFLAGS": "-O2" },
  "Git": { "URI": "https://git.example.com/zlib.git", "Revision": "v1.3.1" },
  "Build": { "CMake": { "Defines": { "CMAKE_BUILD_TYPE": "Release" }, "CMakeListDir": "contrib/cmake" } },
  "Package": { "Name": "zlib", "VersionTag": "v1.3.1" },
  "DockerMatrix": { "ImageNames": ["debian11"] }
}"#,
  );
  write(
    root,
    "package/app/app.json",
    r#"{
  "Git": { "URI": "https://git.example.com/app.git", "Revision": "main" },
  "Package": { "Name": "app", "VersionTag": "v2.0.0", "IsLibrary": false, "IsDevLib": false },
  "DockerMatrix": { "ImageNames": ["debian11", "ubuntu2204"] },
  "DependsOn": ["zlib"]
}"#,
  );
  temp
}

#[test]
fn with_deps_builds_dependency_first() {
  let temp = context();
  let context = ContextManager::new(temp.path());
  context.check_consistency().unwrap();

  let configs = select(&context, &BuildSelection::WithDeps("app".to_string())).unwrap();
  let names: Vec<&str> = configs.iter().map(|c| c.package.name.as_str()).collect();
  assert_eq!(names, vec!["zlib", "app"]);

  assert_eq!(configs[1].builds("").len(), 2);
  assert_eq!(configs[1].builds("debian11").len(), 1);
  assert!(configs[0].builds("ubuntu2204").is_empty());
}

#[test]
fn config_values_flow_into_the_build_chain() {
  let temp = context();
  let context = ContextManager::new(temp.path());
  let configs = select(&context, &BuildSelection::Package("zlib".to_string())).unwrap();

  let mut build = configs[0].builds("debian11").remove(0);
  build.set_sysroot(Sysroot::new(
    temp.path().join("install_sysroot"),
    PlatformString::explicit("debian", "11", "x86-64"),
    false,
  ));
  let commands = build.build_chain().unwrap().generate_commands().unwrap();

  assert!(commands.contains(&r#"export CFLAGS="-O2""#.to_string()));
  assert!(commands.contains(&"git clone --recursive https://git.example.com/zlib.git /git".to_string()));
  assert!(commands.contains(&"git checkout v1.3.1".to_string()));
  assert!(commands.contains(
    &r#"cmake -DCMAKE_BUILD_TYPE="Release" -DCMAKE_INSTALL_PREFIX="/INSTALL" -DCMAKE_PREFIX_PATH="/sysroot" /git/contrib/cmake"#
      .to_string()
  ));
  assert_eq!(commands.last().map(String::as_str), Some("make install"));
}

#[test]
fn invalid_env_key_is_a_typed_error() {
  let temp = context();
  write(
    temp.path(),
    "package/bad/bad.json",
    r#"{ "Env": { "-BAD": "1" }, "Package": { "Name": "bad" }, "DockerMatrix": { "ImageNames": ["debian11"] } }"#,
  );
  let context = ContextManager::new(temp.path());
  let configs = select(&context, &BuildSelection::Package("bad".to_string())).unwrap();
  let build = configs[0].builds("debian11").remove(0);
  assert!(matches!(
    build.build_chain().unwrap().generate_commands(),
    Err(BuildError::InvalidEnvKey(_))
  ));
}

#[test]
fn dependency_cycle_stops_resolution() {
  let temp = context();
  write(
    temp.path(),
    "package/zlib/zlib.json",
    r#"{ "Package": { "Name": "zlib" }, "DockerMatrix": { "ImageNames": ["debian11"] }, "DependsOn": ["app"] }"#,
  );
  let context = ContextManager::new(temp.path());
  let err = select(&context, &BuildSelection::All).unwrap_err();
  assert!(matches!(err, ResolveError::CircularDependency(_)));
  assert!(err.to_string().starts_with("circular dependency detected"));
}
