//! User namespace identity mapping.
//!
//! Maps the invoking user and group to root inside the namespace. Only that
//! single identity is translatable; everything else shows up as the
//! overflow ID.

use husk_common::error::Result;
use husk_common::types::IdMapping;

use crate::kernel::Kernel;

/// Control file that must read `deny` before an unprivileged gid map write.
pub const SETGROUPS_PATH: &str = "/proc/self/setgroups";

/// Which ID map a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdMapKind {
    /// User IDs, `/proc/self/uid_map`.
    Uid,
    /// Group IDs, `/proc/self/gid_map`.
    Gid,
}

impl IdMapKind {
    /// Returns the procfs map file of the current process.
    #[must_use]
    pub const fn proc_path(self) -> &'static str {
        match self {
            Self::Uid => "/proc/self/uid_map",
            Self::Gid => "/proc/self/gid_map",
        }
    }
}

/// Denies `setgroups` and writes the uid and gid maps, in that order.
///
/// # Errors
///
/// Returns an error if any of the three writes fails.
pub fn write_id_maps(kernel: &dyn Kernel, uid_map: &IdMapping, gid_map: &IdMapping) -> Result<()> {
    kernel.deny_setgroups()?;
    kernel.write_id_map(IdMapKind::Uid, uid_map)?;
    kernel.write_id_map(IdMapKind::Gid, gid_map)?;
    tracing::debug!(uid_map = %uid_map, gid_map = %gid_map, "wrote UID/GID map");
    Ok(())
}
