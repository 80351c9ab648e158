//! `husk pull`: pull an image into the local cache.

use std::process::ExitCode;

use clap::Args;
use husk_common::config::RuntimeConfig;
use husk_common::types::ImageReference;
use husk_core::linux::LinuxKernel;
use husk_image::registry::HttpRegistry;
use husk_runtime::engine::Engine;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Resolve the tag through the registry even when it is catalogued.
    #[arg(long)]
    pub refresh: bool,

    /// Image to pull, as `name[:tag]`.
    pub image: String,
}

/// Executes the `pull` command, printing the image directory.
///
/// # Errors
///
/// Returns an error if the pull fails.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn execute(args: &PullArgs, config: &RuntimeConfig) -> anyhow::Result<ExitCode> {
    let image = ImageReference::parse(&args.image)?;
    let registry = HttpRegistry::new(config)?;
    let engine = Engine::new(config.clone(), LinuxKernel::new())?;
    let pulled = engine.pull(registry, &image, super::pull_policy(args.refresh))?;
    if pulled.cached {
        eprintln!("{image}: up to date ({})", pulled.id);
    } else {
        eprintln!("{image}: pulled {} layer(s) ({})", pulled.layers.len(), pulled.id);
    }
    println!("{}", pulled.path.display());
    Ok(ExitCode::SUCCESS)
}
