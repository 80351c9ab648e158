//! Mount utilities for container filesystem setup.
//!
//! Handles bind mounts and the pseudo-filesystems (`/proc`, `/dev`,
//! `/dev/pts`, `/sys`) a usable container root needs.

use std::path::Path;

use husk_common::error::Result;

use crate::kernel::{Kernel, MountFlags, MountRequest};

/// Returns the pseudo-filesystems mounted under `root`, in mount order.
///
/// `/dev/pts` comes after `/dev` because the tmpfs hides whatever the image
/// had there.
#[must_use]
pub fn pseudo_filesystems(root: &Path) -> Vec<MountRequest> {
    vec![
        MountRequest::filesystem("proc", "proc", root.join("proc")),
        MountRequest::filesystem("tmpfs", "tmpfs", root.join("dev"))
            .with_flags(MountFlags {
                nosuid: true,
                strictatime: true,
                ..MountFlags::NONE
            })
            .with_data("mode=755"),
        MountRequest::filesystem("devpts", "devpts", root.join("dev/pts"))
            .with_flags(MountFlags {
                noexec: true,
                nosuid: true,
                ..MountFlags::NONE
            })
            .with_data("newinstance,ptmxmode=0666,mode=620"),
        MountRequest::filesystem("sysfs", "sysfs", root.join("sys")).with_flags(MountFlags {
            readonly: true,
            nosuid: true,
            noexec: true,
            nodev: true,
            ..MountFlags::NONE
        }),
    ]
}

/// Mounts the essential pseudo-filesystems under `root`.
///
/// Each mount point is created right before its mount.
///
/// # Errors
///
/// Returns an error if a mount point cannot be created or a mount fails.
pub fn mount_essential_filesystems(kernel: &dyn Kernel, root: &Path) -> Result<()> {
    tracing::debug!(root = %root.display(), "mounting essential filesystems");
    for request in pseudo_filesystems(root) {
        kernel.create_dir(&request.target)?;
        kernel.mount(&request)?;
    }
    Ok(())
}

/// Creates a bind mount from source to target.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(kernel: &dyn Kernel, source: &Path, target: &Path, recursive: bool) -> Result<()> {
    let request = MountRequest {
        source: Some(source.display().to_string()),
        target: target.to_path_buf(),
        fstype: None,
        flags: MountFlags {
            bind: true,
            recursive,
            ..MountFlags::NONE
        },
        data: None,
    };
    kernel.mount(&request)?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "created bind mount"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{KernelCall, RecordingKernel};

    #[test]
    fn pseudo_filesystems_use_hardened_flags() {
        let mounts = pseudo_filesystems(Path::new("/"));
        let targets: Vec<_> = mounts.iter().map(|m| m.target.display().to_string()).collect();
        assert_eq!(targets, ["/proc", "/dev", "/dev/pts", "/sys"]);

        assert_eq!(mounts[1].flags.to_string(), "MS_NOSUID|MS_STRICTATIME");
        assert_eq!(mounts[1].data.as_deref(), Some("mode=755"));
        assert_eq!(mounts[2].flags.to_string(), "MS_NOSUID|MS_NOEXEC");
        assert!(mounts[2].data.as_deref().is_some_and(|d| d.contains("newinstance")));
        assert_eq!(
            mounts[3].flags.to_string(),
            "MS_RDONLY|MS_NOSUID|MS_NODEV|MS_NOEXEC"
        );
    }

    #[test]
    fn mount_points_are_created_before_each_mount() {
        let kernel = RecordingKernel::new();
        mount_essential_filesystems(&kernel, Path::new("/")).expect("mount");

        let calls = kernel.calls();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls[2], KernelCall::CreateDir("/dev".into()));
        assert_eq!(calls[4], KernelCall::CreateDir("/dev/pts".into()));
        assert!(matches!(&calls[3], KernelCall::Mount(m) if m.target == Path::new("/dev")));
    }

    #[test]
    fn bind_mount_sets_bind_and_rec() {
        let kernel = RecordingKernel::new();
        bind_mount(&kernel, Path::new("/a"), Path::new("/a"), true).expect("bind");
        let mounts = kernel.mounts();
        assert_eq!(mounts[0].flags.to_string(), "MS_BIND|MS_REC");
        assert_eq!(mounts[0].source.as_deref(), Some("/a"));
    }
}
