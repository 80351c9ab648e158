//! `husk run`: run a command inside a fresh container.

use std::process::ExitCode;

use clap::Args;
use husk_common::config::RuntimeConfig;
use husk_common::types::{ImageReference, RootfsMode};
use husk_core::linux::LinuxKernel;
use husk_image::registry::HttpRegistry;
use husk_runtime::engine::{Engine, RunRequest};

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Mount the image under a writable overlay instead of copying it.
    #[arg(long)]
    pub overlay: bool,

    /// Remove the container workspace once the command exits.
    #[arg(long)]
    pub rm: bool,

    /// Resolve the tag through the registry even when it is catalogued.
    #[arg(long)]
    pub refresh: bool,

    /// Image to run, as `name[:tag]`.
    pub image: String,

    /// Command executed inside the container.
    pub command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Executes the `run` command.
///
/// The exit code is the container command's own status.
///
/// # Errors
///
/// Returns an error if the image cannot be pulled, the root cannot be built,
/// or the container cannot be started.
pub fn execute(args: RunArgs, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let request = RunRequest {
        image: ImageReference::parse(&args.image)?,
        command: args.command,
        args: args.args,
        mode: if args.overlay {
            RootfsMode::Overlay
        } else {
            RootfsMode::Copy
        },
        remove: args.rm,
        policy: super::pull_policy(args.refresh),
    };
    tracing::info!(image = %request.image, mode = %request.mode, "run requested");

    let registry = HttpRegistry::new(&config)?;
    let engine = Engine::new(config, LinuxKernel::new())?;
    let status = engine.run(registry, &request)?;
    Ok(output::exit_code(status))
}
