//! `husk images`: list or forget catalogued images.

use std::process::ExitCode;

use clap::Args;
use husk_common::config::RuntimeConfig;
use husk_common::types::ImageReference;
use husk_core::linux::LinuxKernel;
use husk_image::catalog::ImageEntry;
use husk_runtime::engine::Engine;

use crate::output::format_bytes;

const SHORT_ID_LEN: usize = 12;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Forget the catalog entry for `name[:tag]`; cached files are kept.
    #[arg(long, value_name = "IMAGE")]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
#[allow(clippy::print_stdout)]
pub fn execute(args: &ImagesArgs, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let engine = Engine::new(config, LinuxKernel::new())?;
    if let Some(reference) = &args.remove {
        let image = ImageReference::parse(reference)?;
        let removed = engine.forget_image(&image)?;
        println!("removed {} ({})", removed.reference, removed.id);
        return Ok(ExitCode::SUCCESS);
    }

    let mut entries = engine.images()?;
    entries.sort_by(|a, b| a.reference.to_string().cmp(&b.reference.to_string()));
    for line in render(&entries) {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Renders catalog entries as tab-separated rows under a header.
fn render(entries: &[ImageEntry]) -> Vec<String> {
    let mut lines = vec!["IMAGE\tID\tLAYERS\tSIZE\tPULLED".to_owned()];
    lines.extend(entries.iter().map(|entry| {
        let id: String = entry.id.as_str().chars().take(SHORT_ID_LEN).collect();
        format!(
            "{}\t{id}\t{}\t{}\t{}",
            entry.reference,
            entry.layers.len(),
            format_bytes(entry.size_bytes),
            entry.pulled_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }));
    lines
}

#[cfg(test)]
mod tests {
    use husk_common::types::ContentId;

    use super::*;

    #[test]
    fn render_shortens_ids_and_formats_sizes() {
        let entry = ImageEntry {
            reference: ImageReference::parse("busybox").expect("reference"),
            id: ContentId::new("0123456789abcdef0123").expect("id"),
            layers: vec![ContentId::new("a").expect("id"), ContentId::new("b").expect("id")],
            size_bytes: 2048,
            pulled_at: "2026-01-01T00:00:00Z".parse().expect("timestamp"),
        };
        let lines = render(&[entry]);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "busybox:latest\t0123456789ab\t2\t2.0 KiB\t2026-01-01 00:00:00"
        );
    }

    #[test]
    fn render_empty_catalog_prints_header_only() {
        assert_eq!(render(&[]).len(), 1);
    }
}
