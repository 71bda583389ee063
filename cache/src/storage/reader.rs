//! Read side of the cache.
//!
//! Anything found on disk that the writer could not have produced is
//! reported as corruption rather than skipped.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keel_core::digest::DescriptorDigest;
use keel_core::error::{KeelError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::files::{CacheStorageFiles, CONFIG_FILE_NAME, LOCK_FILE_NAME, MANIFEST_FILE_NAME};
use crate::blob::FileBlob;
use crate::layer::CachedLayer;
use crate::lock::LockFile;
use crate::manifest::{
    ContainerConfigTemplate, ManifestAndConfig, ManifestTemplate, OCI_MANIFEST_MEDIA_TYPE,
    V22_MANIFEST_MEDIA_TYPE,
};
use crate::reference::ImageReference;

#[derive(Debug, Clone)]
pub struct CacheStorageReader {
    files: CacheStorageFiles,
}

impl CacheStorageReader {
    pub fn new(files: CacheStorageFiles) -> Self {
        Self { files }
    }

    /// Digests of every layer directory. Fails if any entry under
    /// `layers/` is not named by a digest hash.
    pub fn fetch_digests(&self) -> Result<BTreeSet<DescriptorDigest>> {
        let layers_directory = self.files.layers_directory();
        let entries = match fs::read_dir(&layers_directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut digests = BTreeSet::new();
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            let digest = DescriptorDigest::from_hash(&name).map_err(|_| {
                self.corrupted(format!(
                    "Found non-digest file in layers directory: {}",
                    layers_directory.join(name.as_ref()).display()
                ))
            })?;
            digests.insert(digest);
        }
        Ok(digests)
    }

    /// The layer stored under `digest`, if any.
    pub fn retrieve(&self, digest: &DescriptorDigest) -> Result<Option<CachedLayer>> {
        let layer_directory = self.files.layer_directory(digest);
        if !layer_directory.is_dir() {
            return Ok(None);
        }

        let layer_files = fs::read_dir(&layer_directory)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<PathBuf>>>()?
            .into_iter()
            .filter(|path| CacheStorageFiles::is_layer_file(path))
            .collect::<Vec<_>>();

        let layer_file = match layer_files.as_slice() {
            [] => {
                tracing::warn!(
                    digest = %digest,
                    path = %layer_directory.display(),
                    "Layer directory has no layer file"
                );
                return Ok(None);
            }
            [layer_file] => layer_file,
            _ => {
                return Err(self.corrupted(format!(
                    "Multiple layer files found for layer with digest {} in directory: {}",
                    digest.hash(),
                    layer_directory.display()
                )))
            }
        };

        let diff_id = self.files.diff_id(layer_file)?;
        let size = fs::metadata(layer_file)?.len();
        CachedLayer::builder()
            .digest(digest.clone())
            .diff_id(diff_id)
            .size(size)
            .blob(FileBlob::new(layer_file))
            .build()
            .map(Some)
    }

    /// The layer digest a selector points to, if any.
    pub fn select(&self, selector: &DescriptorDigest) -> Result<Option<DescriptorDigest>> {
        let selector_file = self.files.selector_file(selector);
        let contents = match fs::read(&selector_file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let contents = String::from_utf8_lossy(&contents);
        DescriptorDigest::from_hash(&contents).map(Some).map_err(|_| {
            self.corrupted(format!(
                "Expected valid layer digest as contents of selector file {} for selector {}, but got: {}",
                selector_file.display(),
                selector.hash(),
                contents
            ))
        })
    }

    /// Manifest and configuration stored for an image, if any.
    pub fn retrieve_metadata(
        &self,
        image_reference: &ImageReference,
    ) -> Result<Option<ManifestAndConfig>> {
        let image_directory = self.files.image_directory(image_reference);
        if !image_directory.is_dir() {
            return Ok(None);
        }
        let _lock = LockFile::lock_shared(&image_directory.join(LOCK_FILE_NAME))?;

        let manifest_path = image_directory.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let manifest_json: Value = self.read_json(&manifest_path)?;

        let schema_version = manifest_json
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                self.corrupted(format!(
                    "Cannot find field 'schemaVersion' in manifest {}",
                    manifest_path.display()
                ))
            })?;

        let manifest = match schema_version {
            1 => ManifestTemplate::V21(self.parse(manifest_json, &manifest_path)?),
            2 => match manifest_json.get("mediaType").and_then(Value::as_str) {
                Some(V22_MANIFEST_MEDIA_TYPE) => {
                    ManifestTemplate::V22(self.parse(manifest_json, &manifest_path)?)
                }
                Some(OCI_MANIFEST_MEDIA_TYPE) => {
                    ManifestTemplate::Oci(self.parse(manifest_json, &manifest_path)?)
                }
                other => {
                    return Err(self.corrupted(format!(
                        "Unknown manifest mediaType {:?} in {}",
                        other.unwrap_or_default(),
                        manifest_path.display()
                    )))
                }
            },
            other => {
                return Err(self.corrupted(format!(
                    "Unknown schemaVersion in manifest: {} - only 1 and 2 are supported",
                    other
                )))
            }
        };

        if !manifest.requires_config() {
            return Ok(Some(ManifestAndConfig {
                manifest,
                config: None,
            }));
        }

        let config_path = image_directory.join(CONFIG_FILE_NAME);
        if !config_path.is_file() {
            return Err(self.corrupted(format!(
                "Manifest found, but missing container configuration for {}",
                image_reference
            )));
        }
        let config: ContainerConfigTemplate = self.read_json(&config_path)?;

        Ok(Some(ManifestAndConfig {
            manifest,
            config: Some(config),
        }))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            self.corrupted(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn parse<T: DeserializeOwned>(&self, json: Value, path: &Path) -> Result<T> {
        serde_json::from_value(json).map_err(|e| {
            self.corrupted(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn corrupted(&self, message: String) -> KeelError {
        KeelError::corrupted(self.files.cache_directory(), message)
    }
}
