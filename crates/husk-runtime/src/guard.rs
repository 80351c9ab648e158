//! Host-side ownership of an overlay mount.
//!
//! An overlay is mounted in the host mount namespace, but the worker that
//! runs the container moves itself into a new one and can no longer see it.
//! The guard is the process that stays behind: it owns the
//! [`OverlayMount`], waits for the worker and then unmounts.

use husk_common::error::Result;
use husk_core::filesystem::overlayfs::OverlayMount;
use husk_core::kernel::Kernel;

use crate::process::ExitStatus;

/// Owner of an overlay mount for the duration of one run.
#[derive(Debug)]
#[must_use = "the guarded overlay is only unmounted by `supervise`"]
pub struct MountGuard {
    mount: OverlayMount,
}

/// Result of a supervised run.
#[derive(Debug)]
#[must_use]
pub struct Supervised {
    result: Result<ExitStatus>,
    unmounted: bool,
}

impl Supervised {
    /// Whether the overlay was detached after the worker finished.
    pub const fn unmounted(&self) -> bool {
        self.unmounted
    }

    /// The worker's status, or the first error of the run.
    ///
    /// # Errors
    ///
    /// Returns the worker's error if it failed, otherwise the unmount error
    /// if the overlay could not be detached.
    pub fn into_result(self) -> Result<ExitStatus> {
        self.result
    }
}

impl MountGuard {
    /// Takes ownership of `mount`.
    pub const fn new(mount: OverlayMount) -> Self {
        Self { mount }
    }

    /// Runs `worker` to completion, then unmounts the overlay.
    ///
    /// The overlay is unmounted even when `worker` fails. The worker's
    /// status is forwarded unchanged through [`Supervised::into_result`].
    pub fn supervise<F>(self, kernel: &dyn Kernel, worker: F) -> Supervised
    where
        F: FnOnce() -> Result<ExitStatus>,
    {
        tracing::debug!(merged = %self.mount.merged_dir().display(), "guarding overlay");
        let outcome = worker();
        let merged = self.mount.merged_dir().to_path_buf();
        let unmounted = self.mount.unmount(kernel);

        let detached = unmounted.is_ok();
        let result = match (outcome, unmounted) {
            (Ok(status), Ok(())) => Ok(status),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), unmounted) => {
                if let Err(unmount_err) = unmounted {
                    tracing::error!(
                        path = %merged.display(),
                        error = %unmount_err,
                        "overlay left mounted"
                    );
                }
                Err(e)
            }
        };
        Supervised {
            result,
            unmounted: detached,
        }
    }
}
