//! Cache facade: layer lookup by entries or digest, layer writes, and
//! image metadata.
//!
//! A `Cache` holds nothing but its root directory, so any number of
//! instances (in any number of processes) may share one directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use keel_core::config::KeelConfig;
use keel_core::digest::DescriptorDigest;
use keel_core::error::Result;

use crate::blob::Blob;
use crate::builder::ReproducibleLayerBuilder;
use crate::entry::LayerEntry;
use crate::layer::CachedLayer;
use crate::manifest::{ContainerConfigTemplate, ManifestAndConfig, ManifestTemplate};
use crate::reference::ImageReference;
use crate::selector::generate_selector;
use crate::storage::{CacheStorageFiles, CacheStorageReader, CacheStorageWriter};

/// Outcome of [`Cache::retrieve_or_build`].
#[derive(Debug, Clone)]
pub struct RetrievedLayer {
    pub layer: CachedLayer,
    /// `true` when the layer was found without building.
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct Cache {
    directory: PathBuf,
    reader: CacheStorageReader,
    writer: CacheStorageWriter,
}

impl Cache {
    /// Open (creating if needed) the cache rooted at `directory`.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let files = CacheStorageFiles::new(&directory);
        Ok(Self {
            reader: CacheStorageReader::new(files.clone()),
            writer: CacheStorageWriter::new(files),
            directory,
        })
    }

    /// The base image layers cache and the application layers cache
    /// described by `config`.
    pub fn from_config(config: &KeelConfig) -> Result<(Self, Self)> {
        config.validate()?;
        let base = Self::with_directory(config.base_image_layers_dir())?
            .with_compression_level(config.compression_level);
        let application = Self::with_directory(config.application_layers_dir())?
            .with_compression_level(config.compression_level);
        Ok((base, application))
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.writer = self.writer.with_compression_level(level);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Compress and store a layer built from `entries`, recording the
    /// entries' selector so a later [`Cache::retrieve`] finds it.
    pub fn write_uncompressed_layer(
        &self,
        blob: &dyn Blob,
        entries: &[LayerEntry],
    ) -> Result<CachedLayer> {
        let selector = generate_selector(entries)?;
        self.writer.write_uncompressed(blob, Some(&selector))
    }

    /// Store a layer that is already gzip-compressed, such as one pulled
    /// from a registry.
    pub fn write_compressed_layer(&self, blob: &dyn Blob) -> Result<CachedLayer> {
        self.writer.write_compressed(blob)
    }

    pub fn write_metadata(
        &self,
        image_reference: &ImageReference,
        manifest: &ManifestTemplate,
        config: Option<&ContainerConfigTemplate>,
    ) -> Result<()> {
        self.writer.write_metadata(image_reference, manifest, config)
    }

    /// The layer previously written for `entries`, if the entries' source
    /// files still have the modification times they had then.
    pub fn retrieve(&self, entries: &[LayerEntry]) -> Result<Option<CachedLayer>> {
        let selector = generate_selector(entries)?;
        self.retrieve_by_selector(&selector)
    }

    pub fn retrieve_by_digest(&self, digest: &DescriptorDigest) -> Result<Option<CachedLayer>> {
        self.reader.retrieve(digest)
    }

    pub fn retrieve_metadata(
        &self,
        image_reference: &ImageReference,
    ) -> Result<Option<ManifestAndConfig>> {
        self.reader.retrieve_metadata(image_reference)
    }

    /// Digests of every layer in the cache.
    pub fn cached_digests(&self) -> Result<BTreeSet<DescriptorDigest>> {
        self.reader.fetch_digests()
    }

    /// Return the cached layer for `entries`, or build it reproducibly and
    /// cache it.
    pub fn retrieve_or_build(&self, entries: Vec<LayerEntry>) -> Result<RetrievedLayer> {
        let selector = generate_selector(&entries)?;
        if let Some(layer) = self.retrieve_by_selector(&selector)? {
            tracing::debug!(selector = %selector, digest = %layer.digest(), "Layer cache hit");
            return Ok(RetrievedLayer {
                layer,
                cache_hit: true,
            });
        }

        tracing::debug!(selector = %selector, entries = entries.len(), "Layer cache miss, building");
        let blob = ReproducibleLayerBuilder::new(entries).build()?;
        let layer = self.writer.write_uncompressed(&blob, Some(&selector))?;
        Ok(RetrievedLayer {
            layer,
            cache_hit: false,
        })
    }

    fn retrieve_by_selector(&self, selector: &DescriptorDigest) -> Result<Option<CachedLayer>> {
        let Some(digest) = self.reader.select(selector)? else {
            return Ok(None);
        };
        let layer = self.reader.retrieve(&digest)?;
        if layer.is_none() {
            tracing::debug!(selector = %selector, digest = %digest, "Selector points to a missing layer");
        }
        Ok(layer)
    }
}
