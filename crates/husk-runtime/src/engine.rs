//! Runtime engine that orchestrates a container run.
//!
//! A run moves through these states:
//!
//! ```text
//! pulling -> root-building -> (union-wrap) -> namespace-isolating
//!         -> pivoting -> execd -> exited -> (union-unmount)
//! ```
//!
//! The calling process only pulls and builds the root. Everything from
//! isolation on happens in a forked worker, and the command itself runs in
//! the worker's child, which is PID 1 of the new PID namespace. In overlay
//! mode the calling process acts as the guard that unmounts the overlay.

use std::path::Path;

use husk_common::config::RuntimeConfig;
use husk_common::error::Result;
use husk_common::types::{ImageReference, RootfsMode, RunState};
use husk_core::filesystem::pivot_root::pivot_root;
use husk_core::kernel::Kernel;
use husk_core::namespace::{self, IsolationPlan};
use husk_image::catalog::{ImageCatalog, ImageEntry};
use husk_image::pull::{ImagePuller, PullPolicy, PulledImage};
use husk_image::registry::Registry;
use husk_image::storage::StorageBackend;

use crate::container::ContainerWorkspace;
use crate::guard::MountGuard;
use crate::process::{self, ExecSpec, ExitStatus};
use crate::rootfs::{self, RootFs};

/// Everything `husk run` was asked to do.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image to run.
    pub image: ImageReference,
    /// Command executed inside the container.
    pub command: String,
    /// Arguments passed after the command.
    pub args: Vec<String>,
    /// How the root filesystem is built.
    pub mode: RootfsMode,
    /// Delete the workspace once the command has exited.
    pub remove: bool,
    /// Whether the local catalog may answer the pull.
    pub policy: PullPolicy,
}

/// A container whose root is built but which has not started yet.
#[derive(Debug)]
pub struct PreparedRun {
    /// Image the root was built from.
    pub image: PulledImage,
    /// Workspace holding the root.
    pub workspace: ContainerWorkspace,
    /// The built root, with its overlay in overlay mode.
    pub rootfs: RootFs,
    /// Command to execute.
    pub exec: ExecSpec,
}

/// The runtime engine that coordinates pulls and runs.
#[derive(Debug)]
pub struct Engine<K> {
    config: RuntimeConfig,
    storage: StorageBackend,
    kernel: K,
}

impl<K: Kernel> Engine<K> {
    /// Creates an engine over the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// layout cannot be created.
    pub fn new(config: RuntimeConfig, kernel: K) -> Result<Self> {
        config.validate()?;
        let storage = StorageBackend::open(&config.data_dir)?;
        Ok(Self {
            config,
            storage,
            kernel,
        })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the storage backend.
    #[must_use]
    pub const fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// Returns the kernel the engine drives.
    #[must_use]
    pub const fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Pulls an image, consuming the registry client.
    ///
    /// The client is dropped before this returns, so no HTTP threads
    /// outlive the pull.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    pub fn pull<R: Registry>(
        &self,
        registry: R,
        image: &ImageReference,
        policy: PullPolicy,
    ) -> Result<PulledImage> {
        let puller = ImagePuller::new(registry, self.storage.clone())?;
        puller.pull(image, policy)
    }

    /// Lists catalogued images.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn images(&self) -> Result<Vec<ImageEntry>> {
        ImageCatalog::open(self.storage.catalog_path())?.list()
    }

    /// Removes the catalog entry for `image`.
    ///
    /// Cached layers and the image directory are kept; other tags may
    /// still refer to them.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::NotFound` if the image is not catalogued.
    pub fn forget_image(&self, image: &ImageReference) -> Result<ImageEntry> {
        ImageCatalog::open(self.storage.catalog_path())?.remove(image)
    }

    /// Pulls the image, creates a workspace and builds the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is invalid, the pull fails, or the
    /// root cannot be built. A workspace whose root failed to build is
    /// removed.
    pub fn prepare<R: Registry>(&self, registry: R, request: &RunRequest) -> Result<PreparedRun> {
        let exec = ExecSpec::new(&request.command, &request.args)?;

        enter(RunState::Pulling, &request.image.to_string());
        let image = self.pull(registry, &request.image, request.policy)?;

        let workspace = ContainerWorkspace::create(&self.storage.containers_dir(), &request.image)?;
        let container = workspace.name().to_string();
        enter(RunState::RootBuilding, &container);
        if request.mode == RootfsMode::Overlay {
            enter(RunState::UnionWrap, &container);
        }
        let rootfs = match rootfs::build(&self.kernel, &image.path, workspace.dir(), request.mode) {
            Ok(rootfs) => rootfs,
            Err(e) => {
                if let Err(cleanup) = workspace.remove() {
                    tracing::warn!(error = %cleanup, "failed to remove workspace");
                }
                return Err(e);
            }
        };

        Ok(PreparedRun {
            image,
            workspace,
            rootfs,
            exec,
        })
    }

    /// Starts a prepared container and waits for its command to exit.
    ///
    /// Must be called from a single-threaded process.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be forked or waited for, the
    /// overlay cannot be unmounted, or `remove` is set and the workspace
    /// cannot be deleted. A workspace whose overlay is still mounted is
    /// never deleted.
    pub fn launch(&self, prepared: PreparedRun, remove: bool) -> Result<ExitStatus> {
        let PreparedRun {
            workspace,
            rootfs,
            exec,
            ..
        } = prepared;
        let RootFs { root, overlay } = rootfs;
        let container = workspace.name().to_string();
        let plan = IsolationPlan::for_current_user(container.clone());

        let run_worker = || {
            process::fork_and_wait("worker", || self.worker(&plan, &root, &exec))
        };
        let (status, unmounted) = match overlay {
            Some(mount) => {
                let outcome = MountGuard::new(mount).supervise(&self.kernel, run_worker);
                enter(RunState::UnionUnmount, &container);
                let unmounted = outcome.unmounted();
                (outcome.into_result(), unmounted)
            }
            None => (run_worker(), true),
        };
        if let Ok(status) = &status {
            enter(RunState::Exited, &container);
            tracing::info!(container = %container, %status, "container exited");
        }

        if remove && unmounted {
            if let Err(e) = workspace.remove() {
                if status.is_ok() {
                    return Err(e);
                }
                tracing::warn!(container = %container, error = %e, "failed to remove workspace");
            }
        } else if remove {
            tracing::warn!(
                container = %container,
                path = %workspace.dir().display(),
                "overlay still mounted, workspace kept"
            );
        } else {
            tracing::info!(container = %container, path = %workspace.dir().display(), "workspace kept");
        }
        status
    }

    /// Runs `request` end to end and returns the command's exit status.
    ///
    /// # Errors
    ///
    /// See [`Engine::prepare`] and [`Engine::launch`].
    pub fn run<R: Registry>(&self, registry: R, request: &RunRequest) -> Result<ExitStatus> {
        let prepared = self.prepare(registry, request)?;
        self.launch(prepared, request.remove)
    }

    /// Body of the worker: isolate, then fork the container's init.
    fn worker(&self, plan: &IsolationPlan, root: &Path, exec: &ExecSpec) -> i32 {
        process::or_runtime_failure("worker", || {
            enter(RunState::NamespaceIsolating, &plan.hostname);
            namespace::isolate(&self.kernel, plan)?;
            let status = process::fork_and_wait("init", || self.init(root, exec))?;
            Ok(status.code())
        })
    }

    /// Body of the container's init: pivot, then exec the command.
    fn init(&self, root: &Path, exec: &ExecSpec) -> i32 {
        let pivoted = process::or_runtime_failure("init", || {
            enter(RunState::Pivoting, &root.display().to_string());
            let _ = pivot_root(&self.kernel, root)?;
            Ok(0)
        });
        if pivoted != 0 {
            return pivoted;
        }
        enter(RunState::Execd, exec.command());
        process::exec(exec)
    }
}

fn enter(state: RunState, subject: &str) {
    tracing::info!(%state, subject, "run state");
}
