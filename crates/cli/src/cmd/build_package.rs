//! Implementation of the `packager build-package` command.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{debug, info};

use packager_lib::batch::PackageBuildOptions;
use packager_lib::context::ContextManager;
use packager_lib::resolve::BuildSelection;

use super::{batch_context, run_mode};
use crate::output::{format_elapsed, print_stat, print_success};

#[derive(Debug, Default, Args)]
pub struct BuildPackageArgs {
  /// Build every package of the context
  #[arg(long)]
  pub all: bool,

  /// Name of the package to build
  #[arg(long)]
  pub name: Option<String>,

  /// Also build the package's dependencies
  #[arg(long)]
  pub build_deps: bool,

  /// Build the packages depending on the named package
  #[arg(long)]
  pub build_deps_on: bool,

  /// Like --build-deps-on, following dependents transitively
  #[arg(long)]
  pub build_deps_on_recursive: bool,

  /// Git LFS repository receiving the package archives
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Image to build in
  #[arg(long)]
  pub image_name: Option<String>,
}

impl BuildPackageArgs {
  /// Turn the flags into a selection, rejecting contradictory combinations.
  pub fn selection(&self) -> Result<BuildSelection> {
    let deps_flags = self.build_deps || self.build_deps_on || self.build_deps_on_recursive;
    if self.all && deps_flags {
      bail!("--all cannot be combined with --build-deps, --build-deps-on or --build-deps-on-recursive");
    }
    if self.build_deps_on && self.build_deps_on_recursive {
      bail!("--build-deps-on cannot be combined with --build-deps-on-recursive");
    }

    match (&self.name, self.all) {
      (Some(_), true) => bail!("--all cannot be combined with --name"),
      (None, true) => Ok(BuildSelection::All),
      (None, false) => bail!("either --all or --name <package> is required"),
      (Some(name), false) => {
        if self.build_deps_on || self.build_deps_on_recursive {
          Ok(BuildSelection::DependsOn {
            name: name.clone(),
            recursive: self.build_deps_on_recursive,
            with_deps: self.build_deps,
          })
        } else if self.build_deps {
          Ok(BuildSelection::WithDeps(name.clone()))
        } else {
          Ok(BuildSelection::Package(name.clone()))
        }
      }
    }
  }

  fn options(&self) -> Result<PackageBuildOptions> {
    let selection = self.selection()?;
    let Some(output_dir) = self.output_dir.clone() else {
      bail!("--output-dir <repo> is required");
    };
    let image_name = match self.image_name.as_deref() {
      Some(image) if !image.is_empty() => image.to_string(),
      _ => bail!("--image-name <image> is required"),
    };
    Ok(PackageBuildOptions {
      selection,
      image_name,
      output_dir,
    })
  }
}

/// Execute the build-package command.
///
/// Prints the built packages in build order, or nothing when the image
/// matched no config.
pub fn cmd_build_package(context: &Path, args: &BuildPackageArgs) -> Result<()> {
  let options = args.options()?;
  let context = ContextManager::new(context);
  let batch = batch_context()?;
  debug!(staging = %batch.paths.local_install.display(), "work paths resolved");
  info!(
    selection = ?options.selection,
    image = %options.image_name,
    output_dir = %options.output_dir.display(),
    "building packages"
  );
  let start = Instant::now();

  let summary = run_mode(&batch, || async {
    batch
      .build_packages(&context, &options)
      .await
      .context("Package build failed")
  })?;

  info!(count = summary.built.len(), "package build finished");
  println!();
  print_success(&format!("{} package(s) built", summary.built.len()));
  for name in &summary.built {
    print_stat("Built", name);
  }
  print_stat("Duration", &format_elapsed(start.elapsed()));
  Ok(())
}
