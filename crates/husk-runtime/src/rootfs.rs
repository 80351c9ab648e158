//! Root filesystem construction.
//!
//! Copy mode gives the container a private copy of the image directory.
//! Overlay mode mounts the image read-only under a per-container writable
//! layer; the returned [`OverlayMount`] has to be handed to whoever stays in
//! the host mount namespace, see [`crate::guard`].

use std::path::{Path, PathBuf};

use husk_common::constants;
use husk_common::error::{HuskError, Result};
use husk_common::types::RootfsMode;
use husk_core::filesystem::overlayfs::{self, OverlayConfig, OverlayMount};
use husk_core::kernel::Kernel;

/// A built container root.
#[derive(Debug)]
pub struct RootFs {
    /// Directory the container pivots into.
    pub root: PathBuf,
    /// Overlay backing `root`, in overlay mode.
    pub overlay: Option<OverlayMount>,
}

/// Builds the root filesystem for a container workspace.
///
/// # Errors
///
/// Returns an error if the image directory cannot be read, `root/` already
/// exists in copy mode, or the overlay mount fails.
pub fn build(
    kernel: &dyn Kernel,
    image_dir: &Path,
    container_dir: &Path,
    mode: RootfsMode,
) -> Result<RootFs> {
    tracing::info!(
        image = %image_dir.display(),
        container = %container_dir.display(),
        %mode,
        "building root filesystem"
    );
    match mode {
        RootfsMode::Copy => {
            let root = container_dir.join(constants::ROOT_DIR);
            copy_dir_recursive(image_dir, &root)?;
            Ok(RootFs {
                root,
                overlay: None,
            })
        }
        RootfsMode::Overlay => {
            if !image_dir.is_dir() {
                return Err(HuskError::NotFound {
                    kind: "image directory",
                    id: image_dir.display().to_string(),
                });
            }
            let config = OverlayConfig::for_container(image_dir, container_dir);
            let mount = overlayfs::mount_overlay(kernel, &config)?;
            Ok(RootFs {
                root: mount.merged_dir().to_path_buf(),
                overlay: Some(mount),
            })
        }
    }
}

/// Recursively copies `src` into the new directory `dst`.
///
/// Symbolic links are recreated verbatim, never followed. Permission bits
/// are carried over by `fs::copy` and set explicitly on directories. Device
/// nodes, FIFOs and sockets are skipped.
///
/// # Errors
///
/// Returns an error if `src` is unreadable or `dst` already exists.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::metadata(src).map_err(|e| HuskError::io(src, e))?;
    std::fs::create_dir(dst).map_err(|e| HuskError::io(dst, e))?;

    let entries = std::fs::read_dir(src).map_err(|e| HuskError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HuskError::io(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| HuskError::io(&src_path, e))?;

        if file_type.is_symlink() {
            let link_target =
                std::fs::read_link(&src_path).map_err(|e| HuskError::io(&src_path, e))?;
            std::os::unix::fs::symlink(&link_target, &dst_path)
                .map_err(|e| HuskError::io(&dst_path, e))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            let _ = std::fs::copy(&src_path, &dst_path).map_err(|e| HuskError::io(&dst_path, e))?;
        } else {
            tracing::warn!(path = %src_path.display(), "skipping special file");
        }
    }

    std::fs::set_permissions(dst, meta.permissions()).map_err(|e| HuskError::io(dst, e))?;
    Ok(())
}
