//! Fixed names, paths and numbers shared by the whole engine.
//!
//! Container paths are absolute paths inside the build image. They are not
//! configurable, so sequential builds in fresh containers never collide.

use std::time::Duration;

/// Directory inside the container the build installs into.
pub const DOCKER_INSTALL_DIR: &str = "/INSTALL";

/// Directory inside the container the package sources are cloned into.
pub const DOCKER_GIT_CLONE_DIR: &str = "/git";

/// Mount point of the attached sysroot inside the container.
pub const DOCKER_SYSROOT_DIR: &str = "/sysroot";

/// Script sourced at the start of every remote shell session, when present.
pub const STARTUP_SCRIPT_PATH: &str = "/environment.sh";

/// Image used when a build does not name one.
pub const DEFAULT_IMAGE_NAME: &str = "debian11";

/// Host port mapped to the container's SSH daemon.
pub const DEFAULT_SSH_PORT: u16 = 1122;

/// SSH port inside the container.
pub const CONTAINER_SSH_PORT: u16 = 22;

pub const DEFAULT_SSH_HOST: &str = "127.0.0.1";
pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_PASSWORD: &str = "1234";

/// Number of SSH login attempts before giving up.
pub const SSH_LOGIN_ATTEMPTS: u32 = 5;

/// Pause between two SSH login attempts.
pub const SSH_LOGIN_BACKOFF: Duration = Duration::from_secs(1);

/// Default `make -j` parallelism.
pub const DEFAULT_MAKE_JOBS: u32 = 10;

/// Name of the archive created from [`DOCKER_INSTALL_DIR`] for transfer.
pub const INSTALL_ARCHIVE_NAME: &str = "install_arch.tar";

/// Context subdirectory holding one directory per toolchain image.
pub const CONTEXT_DOCKER_DIR: &str = "docker";

/// Context subdirectory holding one directory per package.
pub const CONTEXT_PACKAGE_DIR: &str = "package";

/// Local staging directory name for downloaded install trees.
pub const LOCAL_INSTALL_DIR_NAME: &str = "localInstall";

/// Local directory name holding every sysroot.
pub const SYSROOT_DIR_NAME: &str = "install_sysroot";

/// File recording short names of packages copied into the sysroots.
pub const BUILT_PACKAGES_FILE: &str = "built_packages.json";

/// Default root for run logs.
pub const LOG_DIR_NAME: &str = "log";

/// Environment variable overriding the base directory for working paths.
pub const WORKDIR_ENV: &str = "PACKAGER_WORKDIR";

/// Maximum number of example paths listed in consistency and overlap reports.
pub const MAX_REPORTED_PATHS: usize = 10;
