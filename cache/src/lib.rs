//! Keel Cache - Content-Addressable Layer Cache
//!
//! Decides whether a filesystem layer must be rebuilt, builds it
//! reproducibly from a set of layer entries, and stores and retrieves it by
//! digest. Image manifests and configurations are cached alongside.

#![allow(clippy::result_large_err)]

pub mod blob;
pub mod builder;
pub mod cache;
pub mod entry;
pub mod layer;
pub mod lock;
pub mod manifest;
pub mod reference;
pub mod selector;
pub mod storage;

// Re-export common types
pub use blob::{Blob, BytesBlob, DigestWriter, FileBlob};
pub use builder::{LayerBlob, ReproducibleLayerBuilder};
pub use cache::{Cache, RetrievedLayer};
pub use entry::{
    default_modification_time, entries_recursive, FilePermissions, LayerEntry,
    DEFAULT_FILE_PERMISSIONS, DEFAULT_FOLDER_PERMISSIONS,
};
pub use layer::{CachedLayer, CachedLayerBuilder};
pub use lock::LockFile;
pub use manifest::{oci_manifest, ContainerConfigTemplate, ManifestAndConfig, ManifestTemplate};
pub use reference::ImageReference;
pub use selector::generate_selector;
pub use storage::{CacheStorageFiles, CacheStorageReader, CacheStorageWriter};
