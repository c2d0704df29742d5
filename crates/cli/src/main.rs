mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildImageArgs, BuildPackageArgs, CreateSysrootArgs};
use output::print_error;

/// packager - builds packages for a target platform inside Docker containers
#[derive(Parser)]
#[command(name = "packager")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Package context directory (holds `docker/` and `package/`)
  #[arg(long, global = true)]
  context: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build packages and commit their archives into a Git LFS repository
  BuildPackage(BuildPackageArgs),

  /// Build toolchain images from the context's Dockerfiles
  BuildImage(BuildImageArgs),

  /// Create a sysroot from the archives in a Git LFS repository
  CreateSysroot(CreateSysrootArgs),
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let Some(context) = cli.context else {
    anyhow::bail!("--context <dir> is required");
  };
  match cli.command {
    Commands::BuildPackage(args) => cmd::cmd_build_package(&context, &args),
    Commands::BuildImage(args) => cmd::cmd_build_image(&context, &args),
    Commands::CreateSysroot(args) => cmd::cmd_create_sysroot(&context, &args),
  }
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  if let Err(e) = run(cli) {
    print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}
