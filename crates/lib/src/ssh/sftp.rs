use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{ShellEvaluator, SshCredentials, SshError, SshSession};
use crate::build::Tar;
use crate::consts::INSTALL_ARCHIVE_NAME;
use crate::util::fs::is_dir_empty;

/// `LIBSSH2_FX_NO_SUCH_FILE`.
const SFTP_NO_SUCH_FILE: i32 = 2;

const BUFFER_SIZE: usize = 1024 * 1024;

/// Fetches a remote directory as one tar archive into an empty local directory.
#[derive(Debug, Clone)]
pub struct SftpDownload {
  /// Directory inside the container to fetch.
  pub remote_dir: String,
  /// Existing, empty local directory receiving the tree.
  pub local_dir: PathBuf,
  /// Transcript of the remote `tar` run.
  pub log_path: PathBuf,
}

impl SftpDownload {
  pub fn new(remote_dir: impl Into<String>, local_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
    Self {
      remote_dir: remote_dir.into(),
      local_dir: local_dir.into(),
      log_path: log_path.into(),
    }
  }

  /// Remote path of the transfer archive.
  pub fn remote_archive(&self) -> String {
    format!("{}/{}", self.remote_dir.trim_end_matches('/'), INSTALL_ARCHIVE_NAME)
  }

  /// Local path the archive is downloaded to before unpacking.
  pub fn local_archive(&self) -> PathBuf {
    self.local_dir.join(INSTALL_ARCHIVE_NAME)
  }

  /// Remote command packing `remote_dir` into [`Self::remote_archive`].
  pub fn archive_command(&self) -> String {
    Tar::new(INSTALL_ARCHIVE_NAME, &self.remote_dir).command_line()
  }

  /// Check that the staging directory exists and is empty.
  pub fn check_local_dir(&self) -> Result<(), SshError> {
    if !self.local_dir.is_dir() {
      return Err(SshError::StagingMissing(self.local_dir.clone()));
    }
    if !is_dir_empty(&self.local_dir)? {
      return Err(SshError::StagingNotEmpty(self.local_dir.clone()));
    }
    Ok(())
  }

  /// Archive the remote directory, download the archive, unpack it locally
  /// and delete the local archive copy.
  pub async fn download(&self, credentials: &SshCredentials) -> Result<(), SshError> {
    self.check_local_dir()?;

    ShellEvaluator::new(vec![self.archive_command()], &self.log_path)
      .run_over_ssh(credentials)
      .await
      .map_err(|e| SshError::RemoteArchive {
        dir: self.remote_dir.clone(),
        source: Box::new(e),
      })?;

    let credentials = credentials.clone();
    let remote = self.remote_archive();
    let local = self.local_archive();
    tokio::task::spawn_blocking(move || fetch_file_blocking(&credentials, &remote, &local)).await??;

    unpack_tar(&self.local_archive(), &self.local_dir)?;
    std::fs::remove_file(self.local_archive())?;

    info!(local = %self.local_dir.display(), "install directory downloaded");
    Ok(())
  }
}

fn fetch_file_blocking(credentials: &SshCredentials, remote: &str, local: &Path) -> Result<(), SshError> {
  let session = SshSession::connect(credentials)?;
  let sftp = session.session().sftp()?;
  let remote_path = Path::new(remote);

  let stat = match sftp.lstat(remote_path) {
    Ok(stat) => stat,
    Err(e) if matches!(e.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => {
      return Err(SshError::RemoteFileMissing(remote.to_string()));
    }
    Err(e) => return Err(e.into()),
  };

  let source = sftp.open(remote_path)?;
  let mut options = OpenOptions::new();
  options.write(true).create(true).truncate(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(stat.perm.unwrap_or(0o644) & 0o777);
  }
  let dest = options.open(local)?;

  let mut reader = BufReader::with_capacity(BUFFER_SIZE, source);
  let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest);
  let copied = io::copy(&mut reader, &mut writer)?;
  writer.flush()?;

  debug!(remote = %remote, bytes = copied, size = ?stat.size, "archive fetched");
  Ok(())
}

/// Unpack a tar archive into `dest` without overwriting existing files.
pub(crate) fn unpack_tar(archive_path: &Path, dest: &Path) -> Result<(), SshError> {
  let unarchive_err = |source| SshError::Unarchive {
    path: archive_path.to_path_buf(),
    source,
  };
  let file = File::open(archive_path).map_err(unarchive_err)?;
  let mut archive = tar::Archive::new(BufReader::new(file));
  archive.set_overwrite(false);
  archive.set_preserve_permissions(true);
  archive.unpack(dest).map_err(unarchive_err)
}
