//! Filesystem helpers over directory trees.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Collect every non-directory entry under `root` as a path relative to `root`.
///
/// Symlinks are reported as entries and never followed. A missing `root`
/// yields an empty set.
pub fn relative_files(root: &Path) -> io::Result<BTreeSet<PathBuf>> {
  let mut files = BTreeSet::new();
  if !root.exists() {
    return Ok(files);
  }

  for entry in WalkDir::new(root).follow_links(false) {
    let entry = entry.map_err(io::Error::other)?;
    if entry.file_type().is_dir() {
      continue;
    }
    if let Ok(relative) = entry.path().strip_prefix(root) {
      files.insert(relative.to_path_buf());
    }
  }

  Ok(files)
}

/// Returns `true` when `path` does not exist or is a directory with no entries.
pub fn is_dir_empty(path: &Path) -> io::Result<bool> {
  match fs::read_dir(path) {
    Ok(mut entries) => Ok(entries.next().is_none()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
    Err(e) => Err(e),
  }
}

/// Copy the tree under `src` into `dst`, merging with existing directories.
///
/// Symlinks are recreated as symlinks pointing at the same target.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
    let entry = entry.map_err(io::Error::other)?;
    let relative = entry
      .path()
      .strip_prefix(src)
      .map_err(io::Error::other)?;
    let target = dst.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target)?;
    } else {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(original, link)
}

/// Render at most `limit` paths, one per line, for error and warning reports.
pub fn format_path_list<'a>(paths: impl IntoIterator<Item = &'a PathBuf>, limit: usize) -> String {
  paths
    .into_iter()
    .take(limit)
    .map(|p| format!("  {}", p.display()))
    .collect::<Vec<_>>()
    .join("\n")
}
