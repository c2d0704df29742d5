mod build_image;
mod build_package;
mod create_sysroot;

pub use build_image::{BuildImageArgs, cmd_build_image};
pub use build_package::{BuildPackageArgs, cmd_build_package};
pub use create_sysroot::{CreateSysrootArgs, cmd_create_sysroot};

use std::future::Future;

use anyhow::{Context, Result};
use packager_lib::batch::{BatchContext, WorkPaths};
use packager_lib::cleanup::{RunOutcome, interrupt_signal, run_until_interrupted};

use crate::output::print_warning;

/// Batch context rooted at the working directory (or `PACKAGER_WORKDIR`).
fn batch_context() -> Result<BatchContext> {
  let paths = WorkPaths::from_env().context("Failed to determine working directory")?;
  Ok(BatchContext::new(paths))
}

/// Run one mode on a fresh runtime, racing it against Ctrl-C.
///
/// On interrupt the batch's cleanup stack is unwound and the process exits
/// with status 1.
fn run_mode<T, F, Fut>(batch: &BatchContext, mode: F) -> Result<T>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(run_until_interrupted(batch.cleanup(), mode(), interrupt_signal()));
  match outcome {
    RunOutcome::Completed(result) => result,
    RunOutcome::Interrupted { executed } => {
      print_warning(&format!("Interrupted - {executed} cleanup action(s) executed"));
      std::process::exit(1);
    }
  }
}
