//! Per-run log files for remote transcripts.
//!
//! Each run owns `<root>/<YYYY-MM-DD_HH:MM:SS>/`. Inside it, every image gets
//! a directory, and every package built on that image gets one file per
//! context:
//!
//! ```text
//! log/2024-05-01_10:00:00/
//! ├── debian11/
//! │   ├── image_build.txt
//! │   └── libzlib-dev/
//! │       ├── build_chain.txt
//! │       └── tar.txt
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Which transcript a log file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogContext {
  BuildChain,
  Tar,
  ImageBuild,
}

impl LogContext {
  pub fn as_str(self) -> &'static str {
    match self {
      LogContext::BuildChain => "build_chain",
      LogContext::Tar => "tar",
      LogContext::ImageBuild => "image_build",
    }
  }
}

impl fmt::Display for LogContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Log directory of one run.
#[derive(Debug, Clone)]
pub struct BuildLogs {
  dir: PathBuf,
}

impl BuildLogs {
  /// Logs under `root`, stamped with the current local time.
  pub fn new(root: &Path) -> Self {
    Self::with_timestamp(root, Local::now())
  }

  pub fn with_timestamp(root: &Path, timestamp: DateTime<Local>) -> Self {
    Self {
      dir: root.join(timestamp.format("%Y-%m-%d_%H:%M:%S").to_string()),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Path of the log file for `context`, creating its directory.
  ///
  /// With `package = None` the file sits directly in the image directory.
  pub fn context_file(&self, image: &str, package: Option<&str>, context: LogContext) -> io::Result<PathBuf> {
    let mut dir = self.dir.join(image);
    if let Some(package) = package {
      dir.push(package);
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{}.txt", context)))
  }
}
