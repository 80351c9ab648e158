//! Mount namespace isolation.
//!
//! A fresh mount namespace starts as a copy of the host's, with shared
//! propagation inherited from it. Until `/` is made private, every mount
//! performed inside the container would show up on the host.

use std::path::Path;

use husk_common::error::Result;

use crate::kernel::{Kernel, MountFlags, MountRequest};

/// Flags that stop mount propagation for `/` and everything below it.
pub const PRIVATE_RECURSIVE: MountFlags = MountFlags {
    private: true,
    recursive: true,
    ..MountFlags::NONE
};

/// Makes the root mount and all submounts private to this namespace.
///
/// Must be the first mount call after the mount namespace is unshared.
///
/// # Errors
///
/// Returns an error if the propagation change is refused.
pub fn make_root_private(kernel: &dyn Kernel) -> Result<()> {
    kernel.mount(&MountRequest::remount_flags(Path::new("/"), PRIVATE_RECURSIVE))?;
    tracing::debug!("root mount propagation set to private");
    Ok(())
}
