//! Write side of the cache.
//!
//! Layers are staged in a fresh directory under `tmp/` and become visible with a single
//! directory rename onto `layers/<digest>/`. The first writer for a digest
//! wins; later writers of the same content discard their staging copy.
//! Selector files and metadata files are replaced atomically, so the last
//! writer wins for those.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use keel_core::digest::{BlobDescriptor, DescriptorDigest};
use keel_core::error::{KeelError, Result};
use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};

use super::files::{CacheStorageFiles, CONFIG_FILE_NAME, LOCK_FILE_NAME, MANIFEST_FILE_NAME};
use crate::blob::{Blob, DigestWriter, FileBlob};
use crate::layer::CachedLayer;
use crate::lock::LockFile;
use crate::manifest::{ContainerConfigTemplate, ManifestTemplate};
use crate::reference::ImageReference;

/// Gzip level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const STAGED_LAYER_FILE_NAME: &str = "layer";

#[derive(Debug, Clone)]
pub struct CacheStorageWriter {
    files: CacheStorageFiles,
    compression: Compression,
}

impl CacheStorageWriter {
    pub fn new(files: CacheStorageFiles) -> Self {
        Self {
            files,
            compression: Compression::new(DEFAULT_COMPRESSION_LEVEL),
        }
    }

    /// Gzip level (0..=9) for uncompressed writes. Changing it changes the
    /// resulting digests, never the diff IDs.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Store an uncompressed layer, compressing it on the way in.
    ///
    /// The diff ID, the compressed digest and the compressed size all come
    /// out of a single pass over the blob. When `selector` is given it is
    /// pointed at the resulting digest.
    pub fn write_uncompressed(
        &self,
        blob: &dyn Blob,
        selector: Option<&DescriptorDigest>,
    ) -> Result<CachedLayer> {
        let staging = self.stage()?;
        let staged_file = staging.path().join(STAGED_LAYER_FILE_NAME);

        let compressed = DigestWriter::new(BufWriter::new(create_file(&staged_file)?));
        let mut encoder = GzEncoder::new(compressed, self.compression);
        let uncompressed = blob.write_to(&mut encoder)?;
        let (compressed, out) = encoder.finish()?.finish();
        out.into_inner().map_err(io::Error::from)?.sync_all()?;

        let layer = self.promote(staging, &staged_file, compressed, uncompressed.digest)?;
        if let Some(selector) = selector {
            self.write_selector(selector, layer.digest())?;
        }
        Ok(layer)
    }

    /// Store an already gzip-compressed layer as is. The diff ID is
    /// computed by decompressing the stored file in a second pass, across
    /// every gzip member it contains.
    pub fn write_compressed(&self, blob: &dyn Blob) -> Result<CachedLayer> {
        let staging = self.stage()?;
        let staged_file = staging.path().join(STAGED_LAYER_FILE_NAME);

        let mut out = BufWriter::new(create_file(&staged_file)?);
        let compressed = blob.write_to(&mut out)?;
        out.into_inner().map_err(io::Error::from)?.sync_all()?;

        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(&staged_file)?));
        let mut uncompressed = DigestWriter::new(io::sink());
        io::copy(&mut decoder, &mut uncompressed).map_err(|e| {
            KeelError::IoError(io::Error::new(
                e.kind(),
                format!("Failed to decompress layer {}: {}", compressed.digest, e),
            ))
        })?;
        let (uncompressed, _) = uncompressed.finish();

        self.promote(staging, &staged_file, compressed, uncompressed.digest)
    }

    /// Store image metadata under `images/<reference>/`.
    ///
    /// Schema 2 manifests require `config`; for schema 1 it is ignored.
    /// Both files are replaced while holding the image's lock file.
    pub fn write_metadata(
        &self,
        image_reference: &ImageReference,
        manifest: &ManifestTemplate,
        config: Option<&ContainerConfigTemplate>,
    ) -> Result<()> {
        let config = match (manifest.requires_config(), config) {
            (true, None) => {
                return Err(KeelError::Other(format!(
                    "Schema {} manifest for {} requires a container configuration",
                    manifest.schema_version(),
                    image_reference
                )))
            }
            (true, config) => config,
            (false, _) => None,
        };

        let image_directory = self.files.image_directory(image_reference);
        fs::create_dir_all(&image_directory)?;
        let _lock = LockFile::lock(&image_directory.join(LOCK_FILE_NAME))?;

        write_json(&image_directory, MANIFEST_FILE_NAME, manifest)?;
        if let Some(config) = config {
            write_json(&image_directory, CONFIG_FILE_NAME, config)?;
        }

        tracing::debug!(
            image = %image_reference,
            schema_version = manifest.schema_version(),
            "Wrote image metadata"
        );
        Ok(())
    }

    fn stage(&self) -> Result<TempDir> {
        fs::create_dir_all(self.files.layers_directory())?;
        let temporary_directory = self.files.temporary_directory();
        fs::create_dir_all(&temporary_directory)?;
        tempfile::Builder::new()
            .prefix("layer-")
            .tempdir_in(&temporary_directory)
            .map_err(|e| {
                KeelError::IoError(io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create staging directory in {}: {}",
                        temporary_directory.display(),
                        e
                    ),
                ))
            })
    }

    /// Name the staged file after its diff ID and move the staging
    /// directory to `layers/<digest>/` unless that already exists.
    fn promote(
        &self,
        staging: TempDir,
        staged_file: &Path,
        compressed: BlobDescriptor,
        diff_id: DescriptorDigest,
    ) -> Result<CachedLayer> {
        fs::rename(staged_file, staging.path().join(diff_id.hash()))?;

        let destination = self.files.layer_directory(&compressed.digest);
        if destination.exists() {
            tracing::debug!(digest = %compressed.digest, "Layer already cached, discarding new copy");
            discard(staging);
        } else if let Err(e) = fs::rename(staging.path(), &destination) {
            // A concurrent writer of the same digest may have moved first.
            if !destination.exists() {
                return Err(KeelError::IoError(io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to move layer into {}: {}",
                        destination.display(),
                        e
                    ),
                )));
            }
            tracing::debug!(digest = %compressed.digest, "Layer cached concurrently, discarding new copy");
            discard(staging);
        } else {
            // Already moved; nothing left to clean up.
            let _ = staging.keep();
            tracing::debug!(
                digest = %compressed.digest,
                diff_id = %diff_id,
                size = compressed.size,
                "Wrote layer"
            );
        }

        let layer_file = self.files.layer_file(&compressed.digest, &diff_id);
        CachedLayer::builder()
            .digest(compressed.digest)
            .diff_id(diff_id)
            .size(compressed.size)
            .blob(FileBlob::new(layer_file))
            .build()
    }

    fn write_selector(&self, selector: &DescriptorDigest, digest: &DescriptorDigest) -> Result<()> {
        fs::create_dir_all(self.files.selectors_directory())?;
        let mut temp = NamedTempFile::new_in(self.files.temporary_directory())?;
        temp.write_all(digest.hash().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.files.selector_file(selector))
            .map_err(|e| e.error)?;

        tracing::debug!(selector = %selector, digest = %digest, "Wrote selector");
        Ok(())
    }
}

fn discard(staging: TempDir) {
    let path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
    }
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| {
        KeelError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to create {}: {}", path.display(), e),
        ))
    })
}

/// Serialize `value` next to its final location, then rename it over
/// `directory/file_name`.
fn write_json<T: Serialize>(directory: &Path, file_name: &str, value: &T) -> Result<()> {
    let mut temp = NamedTempFile::new_in(directory)?;
    serde_json::to_writer(&mut temp, value)?;
    temp.flush()?;
    temp.persist(directory.join(file_name))
        .map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BytesBlob;
    use crate::manifest::{V21Manifest, V22Manifest};
    use std::io::Read;
    use tempfile::TempDir;

    fn writer(tmp: &TempDir) -> CacheStorageWriter {
        CacheStorageWriter::new(CacheStorageFiles::new(tmp.path()))
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_layer(layer: &CachedLayer) -> Vec<u8> {
        let mut out = Vec::new();
        layer.blob().write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_write_uncompressed_layout_and_digests() {
        let tmp = TempDir::new().unwrap();
        let layer = writer(&tmp)
            .write_uncompressed(&BytesBlob::new("layer content"), None)
            .unwrap();

        assert_eq!(layer.diff_id(), &DescriptorDigest::of_bytes(b"layer content"));

        let path = tmp
            .path()
            .join("layers")
            .join(layer.digest().hash())
            .join(layer.diff_id().hash());
        let stored = fs::read(&path).unwrap();
        assert_eq!(layer.digest(), &DescriptorDigest::of_bytes(&stored));
        assert_eq!(layer.size(), stored.len() as u64);
        assert_eq!(read_layer(&layer), stored);

        let mut decompressed = Vec::new();
        MultiGzDecoder::new(&stored[..])
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, b"layer content");
    }

    #[test]
    fn test_write_leaves_no_staging_directories() {
        let tmp = TempDir::new().unwrap();
        writer(&tmp)
            .write_uncompressed(&BytesBlob::new("x"), None)
            .unwrap();
        let leftovers = fs::read_dir(tmp.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_second_write_of_same_content_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let writer = writer(&tmp);
        let first = writer.write_uncompressed(&BytesBlob::new("same"), None).unwrap();
        let second = writer.write_uncompressed(&BytesBlob::new("same"), None).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_dir(tmp.path().join("layers")).unwrap().count(), 1);
        assert_eq!(fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_write_selector_file() {
        let tmp = TempDir::new().unwrap();
        let selector = DescriptorDigest::of_bytes(b"selector");
        let layer = writer(&tmp)
            .write_uncompressed(&BytesBlob::new("content"), Some(&selector))
            .unwrap();

        let contents = fs::read_to_string(tmp.path().join("selectors").join(selector.hash())).unwrap();
        assert_eq!(contents, layer.digest().hash());
    }

    #[test]
    fn test_selector_overwrite_last_writer_wins() {
        let tmp = TempDir::new().unwrap();
        let writer = writer(&tmp);
        let selector = DescriptorDigest::of_bytes(b"selector");
        writer.write_uncompressed(&BytesBlob::new("first"), Some(&selector)).unwrap();
        let second = writer
            .write_uncompressed(&BytesBlob::new("second"), Some(&selector))
            .unwrap();

        let contents = fs::read_to_string(tmp.path().join("selectors").join(selector.hash())).unwrap();
        assert_eq!(contents, second.digest().hash());
    }

    #[test]
    fn test_write_compressed_keeps_bytes() {
        let tmp = TempDir::new().unwrap();
        let compressed = gzip(b"already compressed");
        let layer = writer(&tmp)
            .write_compressed(&BytesBlob::new(compressed.clone()))
            .unwrap();

        assert_eq!(layer.digest(), &DescriptorDigest::of_bytes(&compressed));
        assert_eq!(layer.diff_id(), &DescriptorDigest::of_bytes(b"already compressed"));
        assert_eq!(layer.size(), compressed.len() as u64);
        assert_eq!(read_layer(&layer), compressed);
    }

    #[test]
    fn test_write_compressed_diff_id_covers_every_gzip_member() {
        let tmp = TempDir::new().unwrap();
        let mut compressed = gzip(b"first-half ");
        compressed.extend(gzip(b"second-half"));
        let layer = writer(&tmp)
            .write_compressed(&BytesBlob::new(compressed.clone()))
            .unwrap();

        assert_eq!(
            layer.diff_id(),
            &DescriptorDigest::of_bytes(b"first-half second-half")
        );
        assert_eq!(layer.digest(), &DescriptorDigest::of_bytes(&compressed));
        assert_eq!(read_layer(&layer), compressed);
    }

    #[test]
    fn test_write_compressed_rejects_non_gzip() {
        let tmp = TempDir::new().unwrap();
        let err = writer(&tmp)
            .write_compressed(&BytesBlob::new("not gzip"))
            .unwrap_err();
        assert!(matches!(err, KeelError::IoError(_)));
        assert_eq!(fs::read_dir(tmp.path().join("layers")).unwrap().count(), 0);
        assert_eq!(fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_compression_level_changes_digest_not_diff_id() {
        let tmp = TempDir::new().unwrap();
        let data = "abcdefgh".repeat(512);
        let fast = writer(&tmp)
            .with_compression_level(0)
            .write_uncompressed(&BytesBlob::new(data.clone()), None)
            .unwrap();
        let best = writer(&tmp)
            .with_compression_level(9)
            .write_uncompressed(&BytesBlob::new(data), None)
            .unwrap();

        assert_eq!(fast.diff_id(), best.diff_id());
        assert_ne!(fast.digest(), best.digest());
    }

    #[test]
    fn test_write_metadata_v22() {
        let tmp = TempDir::new().unwrap();
        let reference = ImageReference::parse("gcr.io/distroless/java:17").unwrap();
        let manifest = ManifestTemplate::from(V22Manifest::new(&BlobDescriptor::new(
            2,
            DescriptorDigest::of_bytes(b"{}"),
        )));
        let config = ContainerConfigTemplate::default();

        writer(&tmp)
            .write_metadata(&reference, &manifest, Some(&config))
            .unwrap();

        let dir = tmp.path().join("images/gcr.io/distroless/java!17");
        assert!(dir.join("manifest.json").is_file());
        assert!(dir.join("config.json").is_file());
        assert!(dir.join("lock").is_file());
    }

    #[test]
    fn test_write_metadata_v21_skips_config() {
        let tmp = TempDir::new().unwrap();
        let reference = ImageReference::parse("busybox:1").unwrap();
        let manifest = ManifestTemplate::from(V21Manifest {
            schema_version: 1,
            name: None,
            tag: None,
            architecture: None,
            fs_layers: Vec::new(),
            history: Vec::new(),
        });

        writer(&tmp)
            .write_metadata(&reference, &manifest, Some(&ContainerConfigTemplate::default()))
            .unwrap();

        let dir = tmp.path().join("images/registry-1.docker.io/library/busybox!1");
        assert!(dir.join("manifest.json").is_file());
        assert!(!dir.join("config.json").exists());
    }

    #[test]
    fn test_write_metadata_v22_requires_config() {
        let tmp = TempDir::new().unwrap();
        let reference = ImageReference::parse("busybox:1").unwrap();
        let manifest = ManifestTemplate::from(V22Manifest::new(&BlobDescriptor::new(
            2,
            DescriptorDigest::of_bytes(b"{}"),
        )));

        let err = writer(&tmp)
            .write_metadata(&reference, &manifest, None)
            .unwrap_err();
        assert!(err.to_string().contains("requires a container configuration"));
    }
}
