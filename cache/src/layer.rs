//! Handle to a layer stored in the cache.

use std::fmt;
use std::sync::Arc;

use keel_core::digest::{BlobDescriptor, DescriptorDigest};
use keel_core::error::{KeelError, Result};

use crate::blob::Blob;

/// A cached layer: the digest of its compressed bytes, the digest of its
/// uncompressed bytes (diff ID), the compressed size, and a handle that
/// streams the compressed content.
#[derive(Clone)]
pub struct CachedLayer {
    digest: DescriptorDigest,
    diff_id: DescriptorDigest,
    size: u64,
    blob: Arc<dyn Blob>,
}

impl CachedLayer {
    pub fn builder() -> CachedLayerBuilder {
        CachedLayerBuilder::default()
    }

    /// Digest of the compressed content.
    pub fn digest(&self) -> &DescriptorDigest {
        &self.digest
    }

    /// Digest of the uncompressed content.
    pub fn diff_id(&self) -> &DescriptorDigest {
        &self.diff_id
    }

    /// Size of the compressed content in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn blob(&self) -> &dyn Blob {
        self.blob.as_ref()
    }

    pub fn blob_descriptor(&self) -> BlobDescriptor {
        BlobDescriptor::new(self.size, self.digest.clone())
    }
}

impl PartialEq for CachedLayer {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.diff_id == other.diff_id && self.size == other.size
    }
}

impl Eq for CachedLayer {}

impl fmt::Debug for CachedLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedLayer")
            .field("digest", &self.digest)
            .field("diff_id", &self.diff_id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct CachedLayerBuilder {
    digest: Option<DescriptorDigest>,
    diff_id: Option<DescriptorDigest>,
    size: Option<u64>,
    blob: Option<Arc<dyn Blob>>,
}

impl CachedLayerBuilder {
    pub fn digest(mut self, digest: DescriptorDigest) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn diff_id(mut self, diff_id: DescriptorDigest) -> Self {
        self.diff_id = Some(diff_id);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn blob(mut self, blob: impl Blob + 'static) -> Self {
        self.blob = Some(Arc::new(blob));
        self
    }

    /// Fails with `LayerBuild` naming the first missing field.
    pub fn build(self) -> Result<CachedLayer> {
        Ok(CachedLayer {
            digest: self.digest.ok_or_else(|| missing("digest"))?,
            diff_id: self.diff_id.ok_or_else(|| missing("diff ID"))?,
            size: self.size.ok_or_else(|| missing("size"))?,
            blob: self.blob.ok_or_else(|| missing("blob"))?,
        })
    }
}

fn missing(field: &str) -> KeelError {
    KeelError::LayerBuild(format!("CachedLayer is missing its {}", field))
}
