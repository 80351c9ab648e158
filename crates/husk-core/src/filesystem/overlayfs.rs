//! `OverlayFS` management for copy-on-write container roots.
//!
//! The cached image directory is the read-only lower layer; writes from the
//! container land in a per-container upper layer.

use std::path::{Path, PathBuf};

use husk_common::constants;
use husk_common::error::{HuskError, Result};

use crate::kernel::{Kernel, MountRequest};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Lays out an overlay over `image_dir` inside a container directory:
    /// `root/` (merged), `overlay/` (upper) and `overlay.work/` (work).
    #[must_use]
    pub fn for_container(image_dir: &Path, container_dir: &Path) -> Self {
        Self {
            lower_dirs: vec![image_dir.to_path_buf()],
            upper_dir: container_dir.join(constants::OVERLAY_UPPER_DIR),
            work_dir: container_dir.join(constants::OVERLAY_WORK_DIR),
            merged_dir: container_dir.join(constants::ROOT_DIR),
        }
    }

    /// Builds the `lowerdir=…,upperdir=…,workdir=…` option string.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` if there is no lower layer or a path
    /// contains `,` or `:`, which the option syntax cannot express.
    pub fn mount_options(&self) -> Result<String> {
        if self.lower_dirs.is_empty() {
            return Err(HuskError::Config {
                message: "overlay needs at least one lower directory".into(),
            });
        }
        let all_paths = self
            .lower_dirs
            .iter()
            .chain([&self.upper_dir, &self.work_dir]);
        for path in all_paths {
            let text = path.display().to_string();
            if text.contains([',', ':']) {
                return Err(HuskError::Config {
                    message: format!("overlay path may not contain ',' or ':': {text}"),
                });
            }
        }

        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Ok(format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        ))
    }
}

/// A mounted overlay that still has to be unmounted from the host.
///
/// The handle is deliberately not `Clone`: exactly one owner tears the mount
/// down, and that owner must still live in the host mount namespace.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an overlay mount must be unmounted by its owner"]
pub struct OverlayMount {
    config: OverlayConfig,
}

impl OverlayMount {
    /// Returns the merged mount point.
    #[must_use]
    pub fn merged_dir(&self) -> &Path {
        &self.config.merged_dir
    }

    /// Returns the writable upper layer.
    #[must_use]
    pub fn upper_dir(&self) -> &Path {
        &self.config.upper_dir
    }

    /// Unmounts the overlay, consuming the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount syscall fails.
    pub fn unmount(self, kernel: &dyn Kernel) -> Result<()> {
        unmount_overlay(kernel, &self.config.merged_dir)
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist,
/// then issues the `mount(2)` syscall with overlay-specific options.
///
/// # Errors
///
/// Returns an error if the options are invalid, directory creation fails, or
/// the mount syscall fails.
pub fn mount_overlay(kernel: &dyn Kernel, config: &OverlayConfig) -> Result<OverlayMount> {
    let opts = config.mount_options()?;

    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        std::fs::create_dir_all(dir).map_err(|e| HuskError::io(dir, e))?;
    }

    let request =
        MountRequest::filesystem("overlay", "overlay", &config.merged_dir).with_data(opts);
    kernel.mount(&request)?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(OverlayMount {
        config: config.clone(),
    })
}

/// Unmounts an `OverlayFS` at the given path.
///
/// Uses `MNT_DETACH` to lazily detach the filesystem.
///
/// # Errors
///
/// Returns an error if the unmount syscall fails.
pub fn unmount_overlay(kernel: &dyn Kernel, merged_dir: &Path) -> Result<()> {
    kernel.unmount(merged_dir, true)?;
    tracing::info!(path = %merged_dir.display(), "overlayfs unmounted");
    Ok(())
}
