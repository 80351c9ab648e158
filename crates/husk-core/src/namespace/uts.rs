//! UTS namespace isolation.
//!
//! Gives the container its own hostname.

use husk_common::constants::MAX_HOSTNAME_LEN;
use husk_common::error::{HuskError, Result};

use crate::kernel::Kernel;

/// Checks that `hostname` is accepted by `sethostname(2)`.
///
/// # Errors
///
/// Returns `HuskError::Config` for empty or over-long names, or names with
/// characters outside `[A-Za-z0-9.-]`.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return Err(HuskError::Config {
            message: format!("hostname must be 1-{MAX_HOSTNAME_LEN} bytes: {hostname:?}"),
        });
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(HuskError::Config {
            message: format!("hostname contains invalid characters: {hostname:?}"),
        });
    }
    Ok(())
}

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns an error if the name is invalid or `sethostname(2)` fails.
pub fn set_hostname(kernel: &dyn Kernel, hostname: &str) -> Result<()> {
    validate_hostname(hostname)?;
    kernel.set_hostname(hostname)?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
