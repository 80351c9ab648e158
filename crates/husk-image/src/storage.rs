//! Local storage backend for images and layers.
//!
//! Manages the on-disk layout under the configured data directory:
//!
//! ```text
//! <root>/layers/<id>.tar          one archive per layer
//! <root>/layers/<id>.tar.sha256   digest recorded after download
//! <root>/images/<id>/             merged tree per image
//! <root>/catalog.json             name:tag -> image id
//! <root>/containers/<name>/       per-run container workspaces
//! ```

use std::path::{Path, PathBuf};

use husk_common::constants;
use husk_common::error::{HuskError, Result};
use husk_common::types::ContentId;

/// Manages local storage of images and layers.
#[derive(Debug, Clone)]
pub struct StorageBackend {
    /// Root directory for all stored data.
    root: PathBuf,
}

impl StorageBackend {
    /// Opens or initializes the storage backend at the given root.
    ///
    /// Creates the `layers/`, `images/` and `containers/` directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or accessed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in [
            constants::LAYERS_DIR,
            constants::IMAGES_DIR,
            constants::CONTAINERS_DIR,
        ] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| HuskError::io(&dir, e))?;
        }
        tracing::info!(path = %root.display(), "opening storage backend");
        Ok(Self { root })
    }

    /// Returns the path of a layer's cached archive.
    #[must_use]
    pub fn layer_path(&self, id: &ContentId) -> PathBuf {
        self.root
            .join(constants::LAYERS_DIR)
            .join(format!("{id}.tar"))
    }

    /// Returns the path of a layer's recorded digest.
    #[must_use]
    pub fn layer_digest_path(&self, id: &ContentId) -> PathBuf {
        self.root
            .join(constants::LAYERS_DIR)
            .join(format!("{id}.tar.sha256"))
    }

    /// Returns the path a layer is downloaded to before it is complete.
    #[must_use]
    pub fn layer_partial_path(&self, id: &ContentId) -> PathBuf {
        self.root
            .join(constants::LAYERS_DIR)
            .join(format!("{id}.tar.partial"))
    }

    /// Checks whether a layer exists in the local cache.
    #[must_use]
    pub fn has_layer(&self, id: &ContentId) -> bool {
        self.layer_path(id).is_file()
    }

    /// Returns the directory holding an image's merged tree.
    #[must_use]
    pub fn image_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(constants::IMAGES_DIR).join(id.as_str())
    }

    /// Returns a fresh staging directory path for populating an image.
    ///
    /// Staging directories start with `.` so they never collide with an
    /// image id.
    #[must_use]
    pub fn image_staging_path(&self, id: &ContentId) -> PathBuf {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.root
            .join(constants::IMAGES_DIR)
            .join(format!(".{id}.partial-{nonce}"))
    }

    /// Checks whether a populated image directory exists.
    ///
    /// An existing but empty directory does not count.
    #[must_use]
    pub fn has_image(&self, id: &ContentId) -> bool {
        std::fs::read_dir(self.image_path(id)).is_ok_and(|mut entries| entries.next().is_some())
    }

    /// Returns the image catalog file.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(constants::CATALOG_FILE)
    }

    /// Returns the directory containing container workspaces.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join(constants::CONTAINERS_DIR)
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
