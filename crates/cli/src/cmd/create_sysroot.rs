//! Implementation of the `packager create-sysroot` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use packager_lib::consts::DEFAULT_IMAGE_NAME;
use packager_lib::context::ContextManager;

use super::{batch_context, run_mode};
use crate::output::{print_stat, print_success};

#[derive(Debug, Args)]
pub struct CreateSysrootArgs {
  /// Directory to create the sysroot in; must be empty or absent
  #[arg(long)]
  pub sysroot_dir: PathBuf,

  /// Git LFS repository holding the package archives
  #[arg(long)]
  pub git_lfs: PathBuf,

  /// Image whose packages go into the sysroot
  #[arg(long, default_value = DEFAULT_IMAGE_NAME)]
  pub image_name: String,
}

pub fn cmd_create_sysroot(context: &Path, args: &CreateSysrootArgs) -> Result<()> {
  let context = ContextManager::new(context);
  let batch = batch_context()?;
  info!(
    sysroot = %args.sysroot_dir.display(),
    repo = %args.git_lfs.display(),
    image = %args.image_name,
    "creating sysroot"
  );

  let unpacked = run_mode(&batch, || async {
    batch
      .create_sysroot(&context, &args.sysroot_dir, &args.git_lfs, &args.image_name)
      .await
      .context("Sysroot creation failed")
  })?;

  println!();
  print_success("Sysroot created");
  print_stat("Packages", &unpacked.to_string());
  print_stat("Path", &args.sysroot_dir.display().to_string());
  Ok(())
}
