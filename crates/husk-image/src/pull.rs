//! Image acquisition.
//!
//! A pull resolves `name:tag` to a content ID and makes sure
//! `images/<id>/` holds the union of the image's layers:
//!
//! 1. The local catalog is consulted first; a catalogued image whose
//!    directory is present is returned without any registry request.
//! 2. Otherwise a token is requested and the tag resolved. An existing,
//!    non-empty image directory for that ID is a cache hit.
//! 3. Otherwise the ancestry is fetched, missing layers are downloaded,
//!    and every layer is extracted base-first into a staging directory that
//!    is renamed into place once complete.

use std::path::{Path, PathBuf};

use chrono::Utc;
use husk_common::constants;
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContentId, ImageReference};

use crate::catalog::{ImageCatalog, ImageEntry};
use crate::hash;
use crate::layer;
use crate::registry::Registry;
use crate::storage::StorageBackend;

/// When a pull may be answered from the local catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullPolicy {
    /// Use the catalogued image when its directory is present.
    #[default]
    IfMissing,
    /// Always resolve the tag through the registry.
    Refresh,
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Content ID the tag resolved to.
    pub id: ContentId,
    /// Populated image directory.
    pub path: PathBuf,
    /// Layer IDs, base first. Empty when unknown for a cache hit.
    pub layers: Vec<ContentId>,
    /// Whether the image directory already existed.
    pub cached: bool,
}

/// Fetches images from a [`Registry`] into local storage.
#[derive(Debug)]
pub struct ImagePuller<R> {
    registry: R,
    storage: StorageBackend,
    catalog: ImageCatalog,
}

impl<R: Registry> ImagePuller<R> {
    /// Creates a puller writing into `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be opened.
    pub fn new(registry: R, storage: StorageBackend) -> Result<Self> {
        let catalog = ImageCatalog::open(storage.catalog_path())?;
        Ok(Self {
            registry,
            storage,
            catalog,
        })
    }

    /// Returns the registry this puller talks to.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Pulls `image`, returning its populated directory.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Registry` for network, HTTP or protocol failures,
    /// `HuskError::HashMismatch` if a cached layer was corrupted, and
    /// `HuskError::Io` for cache write or extraction failures. No image
    /// directory is created when the pull fails.
    pub fn pull(&self, image: &ImageReference, policy: PullPolicy) -> Result<PulledImage> {
        tracing::info!(image = %image, ?policy, "pulling image");

        if policy == PullPolicy::IfMissing {
            if let Some(entry) = self.catalog.lookup(image)? {
                if self.storage.has_image(&entry.id) {
                    tracing::info!(image = %image, id = %entry.id, "image found in local catalog");
                    return Ok(PulledImage {
                        path: self.storage.image_path(&entry.id),
                        id: entry.id,
                        layers: entry.layers,
                        cached: true,
                    });
                }
                tracing::debug!(id = %entry.id, "catalogued image directory missing");
            }
        }

        let token = self.registry.token(image)?;
        let id = self.registry.resolve_tag(&token, image)?;
        tracing::debug!(image = %image, id = %id, "tag resolved");

        if self.storage.has_image(&id) {
            tracing::info!(id = %id, "image directory already populated");
            let known = self.catalog.list()?.into_iter().find(|e| e.id == id);
            let (layers, size_bytes) = known.map_or_else(|| (Vec::new(), 0), |e| (e.layers, e.size_bytes));
            self.record(image, &id, &layers, size_bytes)?;
            return Ok(PulledImage {
                path: self.storage.image_path(&id),
                id,
                layers,
                cached: true,
            });
        }

        let mut layers = self.registry.ancestry(&token, &id)?;
        if layers.is_empty() {
            return Err(HuskError::Registry {
                url: id.to_string(),
                message: "image has an empty ancestry".into(),
            });
        }
        if layers.len() > constants::MAX_IMAGE_LAYERS {
            return Err(HuskError::Registry {
                url: id.to_string(),
                message: format!(
                    "image has {} layers, more than the limit of {}",
                    layers.len(),
                    constants::MAX_IMAGE_LAYERS
                ),
            });
        }
        layers.reverse();

        let mut size_bytes = 0;
        for layer_id in &layers {
            size_bytes += self.ensure_layer(&token, layer_id)?;
        }

        let path = self.populate(&id, &layers)?;
        self.record(image, &id, &layers, size_bytes)?;
        tracing::info!(image = %image, id = %id, layers = layers.len(), "image pulled");
        Ok(PulledImage {
            id,
            path,
            layers,
            cached: false,
        })
    }

    /// Makes sure a layer archive is in the cache, returning its size.
    fn ensure_layer(&self, token: &str, id: &ContentId) -> Result<u64> {
        let cached = self.storage.layer_path(id);
        if self.storage.has_layer(id) {
            tracing::debug!(layer = %id, "layer already cached");
            return std::fs::metadata(&cached)
                .map(|m| m.len())
                .map_err(|e| HuskError::io(&cached, e));
        }

        let partial = self.storage.layer_partial_path(id);
        tracing::info!(layer = %id, "downloading layer");
        let bytes = match self.registry.fetch_layer(token, id, &partial) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }
        };
        let digest = hash::hash_file(&partial)?;
        hash::write_digest(&self.storage.layer_digest_path(id), &digest)?;
        std::fs::rename(&partial, &cached).map_err(|e| HuskError::io(&cached, e))?;
        tracing::debug!(layer = %id, bytes, digest = %digest, "layer cached");
        Ok(bytes)
    }

    /// Extracts `layers` base-first into a staging directory and promotes it.
    fn populate(&self, id: &ContentId, layers: &[ContentId]) -> Result<PathBuf> {
        let staging = self.storage.image_staging_path(id);
        let target = self.storage.image_path(id);

        if let Err(e) = self.extract_all(layers, &staging) {
            discard(&staging);
            return Err(e);
        }

        // An empty directory left by an interrupted run blocks the rename.
        if target.is_dir() && !self.storage.has_image(id) {
            std::fs::remove_dir(&target).map_err(|e| HuskError::io(&target, e))?;
        }
        if let Err(e) = std::fs::rename(&staging, &target) {
            discard(&staging);
            if self.storage.has_image(id) {
                tracing::debug!(id = %id, "image populated concurrently");
                return Ok(target);
            }
            return Err(HuskError::io(&target, e));
        }
        Ok(target)
    }

    fn extract_all(&self, layers: &[ContentId], staging: &Path) -> Result<()> {
        std::fs::create_dir_all(staging).map_err(|e| HuskError::io(staging, e))?;
        for layer_id in layers {
            let archive = self.storage.layer_path(layer_id);
            if let Some(expected) = hash::read_digest(&self.storage.layer_digest_path(layer_id))? {
                hash::validate_hash(&archive, &expected)?;
            }
            let _ = layer::extract_layer(&archive, staging)?;
        }
        Ok(())
    }

    fn record(
        &self,
        image: &ImageReference,
        id: &ContentId,
        layers: &[ContentId],
        size_bytes: u64,
    ) -> Result<()> {
        self.catalog.register(ImageEntry {
            reference: image.clone(),
            id: id.clone(),
            layers: layers.to_vec(),
            size_bytes,
            pulled_at: Utc::now(),
        })
    }
}

fn discard(staging: &Path) {
    if let Err(e) = std::fs::remove_dir_all(staging) {
        tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
    }
}
