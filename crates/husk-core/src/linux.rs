//! [`Kernel`] implementation backed by real Linux system calls.

use std::path::Path;

use husk_common::error::{HuskError, Result};
use husk_common::types::IdMapping;

use crate::kernel::{Kernel, MountRequest};
use crate::namespace::NamespaceSet;
use crate::namespace::user::{IdMapKind, SETGROUPS_PATH};

/// Issues the actual system calls through `nix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxKernel;

impl LinuxKernel {
    /// Creates the Linux kernel interface.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
fn kernel_error(operation: &'static str, detail: String, errno: nix::errno::Errno) -> HuskError {
    HuskError::Kernel {
        operation,
        detail,
        source: std::io::Error::from(errno),
    }
}

#[cfg(target_os = "linux")]
impl Kernel for LinuxKernel {
    fn unshare(&self, namespaces: &NamespaceSet) -> Result<()> {
        nix::sched::unshare(namespaces.clone_flags())
            .map_err(|e| kernel_error("unshare", namespaces.to_string(), e))?;
        tracing::debug!(namespaces = %namespaces, "unshared namespaces");
        Ok(())
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        nix::mount::mount(
            request.source.as_deref(),
            request.target.as_path(),
            request.fstype.as_deref(),
            request.flags.to_ms_flags(),
            request.data.as_deref(),
        )
        .map_err(|e| kernel_error("mount", request.to_string(), e))?;
        tracing::debug!(request = %request, "mounted");
        Ok(())
    }

    fn unmount(&self, target: &Path, detach: bool) -> Result<()> {
        use nix::mount::MntFlags;

        let flags = if detach {
            MntFlags::MNT_DETACH
        } else {
            MntFlags::empty()
        };
        nix::mount::umount2(target, flags).map_err(|e| {
            kernel_error(
                "umount2",
                format!("{} detach={detach}", target.display()),
                e,
            )
        })?;
        tracing::debug!(target = %target.display(), detach, "unmounted");
        Ok(())
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        nix::unistd::pivot_root(new_root, put_old).map_err(|e| {
            kernel_error(
                "pivot_root",
                format!("new_root={} put_old={}", new_root.display(), put_old.display()),
                e,
            )
        })?;
        tracing::debug!(new_root = %new_root.display(), "pivoted root");
        Ok(())
    }

    fn deny_setgroups(&self) -> Result<()> {
        // Kernels older than 3.19 have no setgroups file and need no denial.
        if !Path::new(SETGROUPS_PATH).exists() {
            tracing::debug!("no setgroups control file, skipping");
            return Ok(());
        }
        std::fs::write(SETGROUPS_PATH, "deny").map_err(|e| HuskError::Kernel {
            operation: "deny_setgroups",
            detail: SETGROUPS_PATH.into(),
            source: e,
        })
    }

    fn write_id_map(&self, kind: IdMapKind, mapping: &IdMapping) -> Result<()> {
        let path = kind.proc_path();
        std::fs::write(path, format!("{mapping}\n")).map_err(|e| HuskError::Kernel {
            operation: "write_id_map",
            detail: format!("{path} <- {mapping}"),
            source: e,
        })?;
        tracing::debug!(path, %mapping, "wrote id map");
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        nix::unistd::sethostname(hostname)
            .map_err(|e| kernel_error("sethostname", hostname.into(), e))
    }

    fn change_dir(&self, path: &Path) -> Result<()> {
        nix::unistd::chdir(path).map_err(|e| kernel_error("chdir", path.display().to_string(), e))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| HuskError::io(path, e))
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).map_err(|e| HuskError::io(path, e))
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> HuskError {
    HuskError::Config {
        message: "Linux required for native container operations".into(),
    }
}

/// Stub for non-Linux platforms: every isolation primitive fails.
#[cfg(not(target_os = "linux"))]
impl Kernel for LinuxKernel {
    fn unshare(&self, _namespaces: &NamespaceSet) -> Result<()> {
        Err(unsupported())
    }

    fn mount(&self, _request: &MountRequest) -> Result<()> {
        Err(unsupported())
    }

    fn unmount(&self, _target: &Path, _detach: bool) -> Result<()> {
        Err(unsupported())
    }

    fn pivot_root(&self, _new_root: &Path, _put_old: &Path) -> Result<()> {
        Err(unsupported())
    }

    fn deny_setgroups(&self) -> Result<()> {
        Err(unsupported())
    }

    fn write_id_map(&self, _kind: IdMapKind, _mapping: &IdMapping) -> Result<()> {
        Err(unsupported())
    }

    fn set_hostname(&self, _hostname: &str) -> Result<()> {
        Err(unsupported())
    }

    fn change_dir(&self, _path: &Path) -> Result<()> {
        Err(unsupported())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| HuskError::io(path, e))
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).map_err(|e| HuskError::io(path, e))
    }
}
