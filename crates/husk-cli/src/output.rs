//! Formatted output helpers for CLI commands.

use std::process::ExitCode;

use husk_runtime::process::{EXIT_RUNTIME_FAILURE, ExitStatus};

/// Exit status of `husk` itself when it fails before the command runs.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const RUNTIME_FAILURE_EXIT: u8 = EXIT_RUNTIME_FAILURE as u8;

/// Converts a container's exit status into the CLI's exit code.
///
/// Statuses outside `0..=255` cannot be forwarded and map to
/// [`RUNTIME_FAILURE_EXIT`].
#[must_use]
pub fn exit_code(status: ExitStatus) -> ExitCode {
    ExitCode::from(exit_byte(status))
}

fn exit_byte(status: ExitStatus) -> u8 {
    u8::try_from(status.code()).unwrap_or(RUNTIME_FAILURE_EXIT)
}

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
