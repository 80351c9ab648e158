//! # husk-image
//!
//! Image acquisition for the husk runtime.
//!
//! Handles:
//! - **Registry**: Docker registry v1 client (token, tag, ancestry, layer).
//! - **Storage**: on-disk layout of layers, images and container workspaces.
//! - **Layers**: tar extraction with whiteout handling.
//! - **Hashing**: SHA-256 digests recorded for cached layers.
//! - **Catalog**: local `name:tag` to image ID index.
//! - **Pull**: the pipeline tying these together.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod catalog;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod hash;
pub mod layer;
pub mod pull;
pub mod registry;
pub mod storage;
