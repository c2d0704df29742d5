//! packager-lib: cross-compilation package builder
//!
//! Packages are described by JSON configs in a context directory. Each one is
//! built inside a throwaway Docker container reached over SSH, archived into a
//! Git LFS repository and copied into a local sysroot that later builds link
//! against.
//!
//! - `context` / `config`: reading package and image definitions
//! - `resolve`: dependency graph, cycle detection and build order
//! - `build`: build chain rendering and the container executor
//! - `repository`: archive storage in a Git LFS repository
//! - `sysroot`: per-platform install trees
//! - `batch`: the top-level build-package, build-image and create-sysroot modes
//! - `cleanup`: undo actions run on failure or interrupt

pub mod batch;
pub mod build;
pub mod cleanup;
pub mod config;
pub mod consts;
pub mod context;
pub mod docker;
pub mod logs;
pub mod package;
pub mod repository;
pub mod resolve;
pub mod ssh;
pub mod sysroot;
pub mod util;
