//! # husk: minimal container runtime CLI
//!
//! Pulls images from a Docker v1 registry and runs a command inside them
//! with fresh namespaces and a pivoted root.

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Cli;

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("husk: {e:#}");
            ExitCode::from(output::RUNTIME_FAILURE_EXIT)
        }
    }
}
