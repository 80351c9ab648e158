//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root stops being reachable once it is detached.

use std::path::{Path, PathBuf};

use husk_common::constants::OLD_ROOT_DIR;
use husk_common::error::{HuskError, Result};

use super::mount;
use crate::kernel::Kernel;

/// Re-roots the calling process into `new_root`.
///
/// Bind-mounts `new_root` onto itself (`pivot_root` needs a mount point),
/// pivots with the old root parked in `new_root/.old_root`, mounts the
/// pseudo-filesystems, then detaches and deletes the old root. Returns the
/// old root's path as seen from the new root.
///
/// Must run inside a private mount namespace.
///
/// # Errors
///
/// Returns an error if `new_root` is relative or any step fails; the caller
/// must not exec anything in that case.
pub fn pivot_root(kernel: &dyn Kernel, new_root: &Path) -> Result<PathBuf> {
    if !new_root.is_absolute() {
        return Err(HuskError::Config {
            message: format!("new root must be absolute: {}", new_root.display()),
        });
    }
    tracing::info!(new_root = %new_root.display(), "performing pivot_root");

    mount::bind_mount(kernel, new_root, new_root, true)?;

    let put_old = new_root.join(OLD_ROOT_DIR);
    kernel.create_dir(&put_old)?;
    kernel.pivot_root(new_root, &put_old)?;

    let root = Path::new("/");
    kernel.change_dir(root)?;

    mount::mount_essential_filesystems(kernel, root)?;

    let old_root = root.join(OLD_ROOT_DIR);
    kernel.unmount(&old_root, true)?;
    kernel.remove_tree(&old_root)?;

    tracing::debug!(old_root = %old_root.display(), "old root detached and removed");
    Ok(old_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{KernelCall, RecordingKernel};

    #[test]
    fn pivot_sequence_is_bind_pivot_mount_detach() {
        let kernel = RecordingKernel::new();
        let old_root = pivot_root(&kernel, Path::new("/c/box/root")).expect("pivot");
        assert_eq!(old_root, PathBuf::from("/.old_root"));

        assert_eq!(
            kernel.operations(),
            vec![
                "mount",
                "create_dir",
                "pivot_root",
                "change_dir",
                "create_dir",
                "mount",
                "create_dir",
                "mount",
                "create_dir",
                "mount",
                "create_dir",
                "mount",
                "unmount",
                "remove_tree",
            ]
        );

        let calls = kernel.calls();
        assert!(matches!(
            &calls[0],
            KernelCall::Mount(m) if m.flags.bind && m.flags.recursive
                && m.target == Path::new("/c/box/root")
        ));
        assert_eq!(
            calls[2],
            KernelCall::PivotRoot {
                new_root: "/c/box/root".into(),
                put_old: "/c/box/root/.old_root".into(),
            }
        );
        assert_eq!(calls[3], KernelCall::ChangeDir("/".into()));
    }

    #[test]
    fn old_root_is_detached_then_removed() {
        let kernel = RecordingKernel::new();
        let _ = pivot_root(&kernel, Path::new("/c/box/root")).expect("pivot");
        let calls = kernel.calls();
        let tail = &calls[calls.len() - 2..];
        assert_eq!(
            tail,
            [
                KernelCall::Unmount {
                    target: "/.old_root".into(),
                    detach: true,
                },
                KernelCall::RemoveTree("/.old_root".into()),
            ]
        );
    }

    #[test]
    fn failed_pivot_stops_before_pseudo_filesystems() {
        let kernel = RecordingKernel::failing_on("pivot_root");
        assert!(pivot_root(&kernel, Path::new("/c/box/root")).is_err());
        assert_eq!(kernel.mounts().len(), 1);
        assert!(!kernel.operations().contains(&"remove_tree"));
    }

    #[test]
    fn failed_detach_never_removes_old_root() {
        let kernel = RecordingKernel::failing_on("unmount");
        assert!(pivot_root(&kernel, Path::new("/c/box/root")).is_err());
        assert!(!kernel.operations().contains(&"remove_tree"));
    }

    #[test]
    fn relative_root_is_rejected() {
        let kernel = RecordingKernel::new();
        assert!(pivot_root(&kernel, Path::new("relative/root")).is_err());
        assert!(kernel.calls().is_empty());
    }
}
