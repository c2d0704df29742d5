//! Implementation of the `packager build-image` command.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use packager_lib::context::ContextManager;

use super::{batch_context, run_mode};
use crate::output::{print_stat, print_success};

#[derive(Debug, Default, Args)]
pub struct BuildImageArgs {
  /// Build every image of the context
  #[arg(long)]
  pub all: bool,

  /// Name of the image to build
  #[arg(long)]
  pub name: Option<String>,
}

impl BuildImageArgs {
  fn image(&self) -> Result<Option<&str>> {
    match (self.all, self.name.as_deref()) {
      (true, None) => Ok(None),
      (false, Some(name)) if !name.is_empty() => Ok(Some(name)),
      (true, Some(_)) => bail!("--all cannot be combined with --name"),
      _ => bail!("either --all or --name <image> is required"),
    }
  }
}

pub fn cmd_build_image(context: &Path, args: &BuildImageArgs) -> Result<()> {
  let image = args.image()?;
  let context = ContextManager::new(context);
  let batch = batch_context()?;
  info!(image = image.unwrap_or("<all>"), "building images");

  let built = run_mode(&batch, || async {
    batch
      .build_images(&context, image)
      .await
      .context("Image build failed")
  })?;

  println!();
  print_success(&format!("{} image(s) built", built.len()));
  for image in &built {
    print_stat("Image", image);
  }
  print_stat("Logs", &batch.logs().dir().display().to_string());
  Ok(())
}
