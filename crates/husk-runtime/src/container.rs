//! Per-run container workspaces.
//!
//! Every run gets `containers/<image>-<suffix>/`, whose name doubles as the
//! container's hostname. The directory is created exclusively, so two runs
//! can never share one.

use std::path::{Path, PathBuf};

use husk_common::constants;
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContainerName, ImageReference};

const CREATE_ATTEMPTS: usize = 8;

/// Directory owned by one container run.
#[derive(Debug)]
pub struct ContainerWorkspace {
    name: ContainerName,
    dir: PathBuf,
}

impl ContainerWorkspace {
    /// Creates a fresh workspace for `image` under `containers_dir`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Io` if the directory cannot be created, including
    /// when every generated name is already taken.
    pub fn create(containers_dir: &Path, image: &ImageReference) -> Result<Self> {
        let mut last_err = None;
        for _ in 0..CREATE_ATTEMPTS {
            let name = ContainerName::generate(image);
            let dir = containers_dir.join(name.as_str());
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    tracing::info!(container = %name, path = %dir.display(), "workspace created");
                    return Ok(Self { name, dir });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(container = %name, "workspace name taken, retrying");
                    last_err = Some(HuskError::io(&dir, e));
                }
                Err(e) => return Err(HuskError::io(&dir, e)),
            }
        }
        Err(last_err.unwrap_or_else(|| HuskError::Config {
            message: "could not allocate a container workspace".into(),
        }))
    }

    /// Returns the container name, also used as its hostname.
    #[must_use]
    pub const fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Returns the workspace directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the directory that becomes the container's `/`.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        self.dir.join(constants::ROOT_DIR)
    }

    /// Deletes the workspace and everything in it.
    ///
    /// Any overlay mounted inside must already be unmounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be removed.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir).map_err(|e| HuskError::io(&self.dir, e))?;
        tracing::info!(container = %self.name, "workspace removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageReference {
        ImageReference::parse("busybox:latest").expect("reference")
    }

    #[test]
    fn workspaces_are_distinct_and_named_after_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = ContainerWorkspace::create(dir.path(), &image()).expect("a");
        let b = ContainerWorkspace::create(dir.path(), &image()).expect("b");

        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().is_dir());
        assert!(a.name().as_str().starts_with("busybox-"));
        assert_eq!(a.root_dir(), a.dir().join("root"));
    }

    #[test]
    fn remove_deletes_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = ContainerWorkspace::create(dir.path(), &image()).expect("create");
        let path = ws.dir().to_path_buf();
        std::fs::create_dir_all(ws.root_dir().join("etc")).expect("mkdir");

        ws.remove().expect("remove");
        assert!(!path.exists());
    }

    #[test]
    fn missing_parent_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = ContainerWorkspace::create(&dir.path().join("absent"), &image());
        assert!(matches!(result, Err(HuskError::Io { .. })));
    }
}
