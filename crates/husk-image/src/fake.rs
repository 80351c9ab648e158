//! In-memory [`Registry`] for tests.
//!
//! Serves images registered with [`MemoryRegistry::with_image`] and counts
//! every request, so tests can assert that a pull stayed local.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

use husk_common::error::{HuskError, Result};
use husk_common::types::{ContentId, ImageReference};

use crate::registry::Registry;

const FAKE_URL: &str = "memory://registry";
const FAKE_TOKEN: &str = "signature=memory";

/// Registry fake holding tags, ancestries and layer archives in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    tags: HashMap<String, ContentId>,
    ancestries: HashMap<ContentId, Vec<ContentId>>,
    layers: HashMap<ContentId, Vec<u8>>,
    requests: Cell<usize>,
    fetched: RefCell<Vec<ContentId>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an image under `reference`.
    ///
    /// `ancestry` is leaf first, as the registry reports it; the leaf's ID
    /// is what the tag resolves to.
    ///
    /// # Panics
    ///
    /// Panics if the reference or a layer ID is invalid, or `ancestry` is
    /// empty.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_image(mut self, reference: &str, ancestry: Vec<(&str, Vec<u8>)>) -> Self {
        let image = ImageReference::parse(reference).expect("valid reference");
        let chain: Vec<ContentId> = ancestry
            .iter()
            .map(|(id, _)| ContentId::new(*id).expect("valid layer id"))
            .collect();
        let leaf = chain.first().cloned().expect("non-empty ancestry");
        for (id, archive) in chain.iter().zip(ancestry) {
            let _ = self.layers.insert(id.clone(), archive.1);
        }
        let _ = self.ancestries.insert(leaf.clone(), chain);
        let _ = self.tags.insert(tag_key(&image), leaf);
        self
    }

    /// Builds an uncompressed layer archive holding regular files.
    ///
    /// # Panics
    ///
    /// Panics if the archive cannot be assembled in memory.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn tar_layer(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, path, *data)
                .expect("append layer entry");
        }
        builder.into_inner().expect("finish layer archive")
    }

    /// Total number of requests served so far.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.get()
    }

    /// Layer IDs downloaded so far, in request order.
    #[must_use]
    pub fn fetched_layers(&self) -> Vec<ContentId> {
        self.fetched.borrow().clone()
    }

    fn count(&self) {
        self.requests.set(self.requests.get() + 1);
    }
}

fn tag_key(image: &ImageReference) -> String {
    format!("{}:{}", image.repository(), image.tag())
}

fn not_found(what: &str) -> HuskError {
    HuskError::Registry {
        url: FAKE_URL.to_owned(),
        message: format!("HTTP 404 Not Found: {what}"),
    }
}

impl Registry for MemoryRegistry {
    fn token(&self, _image: &ImageReference) -> Result<String> {
        self.count();
        Ok(FAKE_TOKEN.to_owned())
    }

    fn resolve_tag(&self, _token: &str, image: &ImageReference) -> Result<ContentId> {
        self.count();
        self.tags
            .get(&tag_key(image))
            .cloned()
            .ok_or_else(|| not_found(&image.to_string()))
    }

    fn ancestry(&self, _token: &str, id: &ContentId) -> Result<Vec<ContentId>> {
        self.count();
        self.ancestries
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id.as_str()))
    }

    fn fetch_layer(&self, _token: &str, id: &ContentId, dest: &Path) -> Result<u64> {
        self.count();
        let archive = self.layers.get(id).ok_or_else(|| not_found(id.as_str()))?;
        std::fs::write(dest, archive).map_err(|e| HuskError::io(dest, e))?;
        self.fetched.borrow_mut().push(id.clone());
        Ok(archive.len() as u64)
    }
}
