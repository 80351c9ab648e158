//! Local image catalog management.
//!
//! Maps each pulled `name:tag` to the content ID of its image directory so a
//! repeated pull can be served without talking to the registry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContentId, ImageReference};
use serde::{Deserialize, Serialize};

/// Entry in the local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Reference the image was pulled under.
    pub reference: ImageReference,
    /// Content ID the tag resolved to; names the image directory.
    pub id: ContentId,
    /// Layer IDs, base first.
    pub layers: Vec<ContentId>,
    /// Total size of the layer archives in bytes.
    pub size_bytes: u64,
    /// When the image was pulled.
    pub pulled_at: DateTime<Utc>,
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens the catalog stored at `catalog_path`.
    ///
    /// The file is created on first registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(catalog_path: impl Into<PathBuf>) -> Result<Self> {
        let catalog_path = catalog_path.into();
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HuskError::io(parent, e))?;
        }
        Ok(Self { catalog_path })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        let content = match std::fs::read_to_string(&self.catalog_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HuskError::io(&self.catalog_path, e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Looks up the entry recorded for a reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn lookup(&self, reference: &ImageReference) -> Result<Option<ImageEntry>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|entry| &entry.reference == reference))
    }

    /// Registers an image, replacing any entry for the same reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn register(&self, entry: ImageEntry) -> Result<()> {
        let mut entries = self.list()?;
        entries.retain(|e| e.reference != entry.reference);
        tracing::debug!(reference = %entry.reference, id = %entry.id, "registering image");
        entries.push(entry);
        self.write_entries(&entries)
    }

    /// Removes the entry for a reference.
    ///
    /// The image directory itself is left alone; other tags may share it.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::NotFound` if the reference is not catalogued.
    pub fn remove(&self, reference: &ImageReference) -> Result<ImageEntry> {
        let mut entries = self.list()?;
        let Some(pos) = entries.iter().position(|e| &e.reference == reference) else {
            return Err(HuskError::NotFound {
                kind: "image",
                id: reference.to_string(),
            });
        };
        let removed = entries.remove(pos);
        self.write_entries(&entries)?;
        Ok(removed)
    }

    /// Returns the catalog file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.catalog_path
    }

    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| HuskError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.catalog_path)
            .map_err(|e| HuskError::io(&self.catalog_path, e))?;
        Ok(())
    }
}
