//! Path naming for the on-disk cache layout.
//!
//! ```text
//! <root>/
//!   layers/<digest hash>/<diffId hash>
//!   selectors/<selector hash>
//!   images/<registry>/<repository...>!<tag | sha256!hash>/{manifest.json, config.json, lock}
//!   tmp/
//! ```

use std::path::{Path, PathBuf};

use keel_core::digest::{DescriptorDigest, HASH_LENGTH};
use keel_core::error::{KeelError, Result};

use crate::reference::ImageReference;

const LAYERS_DIRECTORY: &str = "layers";
const SELECTORS_DIRECTORY: &str = "selectors";
const IMAGES_DIRECTORY: &str = "images";
const TEMPORARY_DIRECTORY: &str = "tmp";

pub(crate) const MANIFEST_FILE_NAME: &str = "manifest.json";
pub(crate) const CONFIG_FILE_NAME: &str = "config.json";
pub(crate) const LOCK_FILE_NAME: &str = "lock";

/// Resolves cache paths under one root directory. Performs no I/O.
#[derive(Debug, Clone)]
pub struct CacheStorageFiles {
    cache_directory: PathBuf,
}

impl CacheStorageFiles {
    pub fn new(cache_directory: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: cache_directory.into(),
        }
    }

    pub fn cache_directory(&self) -> &Path {
        &self.cache_directory
    }

    /// Whether a file inside a layer directory holds layer content: its name
    /// has exactly the length of a hex digest.
    pub fn is_layer_file(path: &Path) -> bool {
        path.file_name()
            .map(|name| name.len() == HASH_LENGTH)
            .unwrap_or(false)
    }

    /// The diff ID encoded in a layer file's name.
    pub fn diff_id(&self, layer_file: &Path) -> Result<DescriptorDigest> {
        let name = layer_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        DescriptorDigest::from_hash(name).map_err(|_| {
            KeelError::corrupted(
                &self.cache_directory,
                format!("Layer file did not include valid diff ID: {}", layer_file.display()),
            )
        })
    }

    /// `layers/<digest>/<diffId>`
    pub fn layer_file(&self, digest: &DescriptorDigest, diff_id: &DescriptorDigest) -> PathBuf {
        self.layer_directory(digest).join(diff_id.hash())
    }

    /// `layers/<digest>/`
    pub fn layer_directory(&self, digest: &DescriptorDigest) -> PathBuf {
        self.layers_directory().join(digest.hash())
    }

    pub fn layers_directory(&self) -> PathBuf {
        self.cache_directory.join(LAYERS_DIRECTORY)
    }

    /// `selectors/<selector>`
    pub fn selector_file(&self, selector: &DescriptorDigest) -> PathBuf {
        self.selectors_directory().join(selector.hash())
    }

    pub fn selectors_directory(&self) -> PathBuf {
        self.cache_directory.join(SELECTORS_DIRECTORY)
    }

    pub fn images_directory(&self) -> PathBuf {
        self.cache_directory.join(IMAGES_DIRECTORY)
    }

    /// Metadata directory for an image: the qualified reference with `:` and
    /// `@` replaced by `!`, nested on `/`.
    pub fn image_directory(&self, image_reference: &ImageReference) -> PathBuf {
        let replaced = image_reference
            .to_string_with_qualifier()
            .replace([':', '@'], "!");
        replaced
            .split('/')
            .fold(self.images_directory(), |path, segment| path.join(segment))
    }

    pub fn temporary_directory(&self) -> PathBuf {
        self.cache_directory.join(TEMPORARY_DIRECTORY)
    }
}
