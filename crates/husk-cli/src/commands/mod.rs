//! CLI command definitions and dispatch.

pub mod images;
pub mod pull;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use husk_common::config::RuntimeConfig;
use husk_image::pull::PullPolicy;

/// Run a command inside a registry image, isolated by namespaces.
#[derive(Parser, Debug)]
#[command(name = "husk", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the layer, image and container caches.
    #[arg(long, global = true, env = "HUSK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside a fresh container.
    Run(run::RunArgs),
    /// Pull an image into the local cache.
    Pull(pull::PullArgs),
    /// List or forget catalogued images.
    Images(images::ImagesArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Pull(args) => pull::execute(&args, &config),
        Command::Images(args) => images::execute(&args, config),
    }
}

/// Resolves the runtime configuration from flags, file and environment.
///
/// Without `--config` the data directory follows the effective user:
/// a system directory for root, `$HOME/.husk` otherwise.
fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let home = std::env::var_os("HOME").map(PathBuf::from);
            RuntimeConfig::for_privilege(nix::unistd::Uid::effective().is_root(), home.as_deref())
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    config.validate()?;
    Ok(config)
}

/// Maps the `--refresh` flag to a pull policy.
const fn pull_policy(refresh: bool) -> PullPolicy {
    if refresh {
        PullPolicy::Refresh
    } else {
        PullPolicy::IfMissing
    }
}
