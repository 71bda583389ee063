//! Image manifest and container configuration templates.
//!
//! OCI manifests and image configurations are the `oci-spec` types. Docker
//! V2.1 and V2.2 manifests are modelled here. The cache picks the variant
//! from the persisted `schemaVersion` and `mediaType` fields.

use std::collections::BTreeMap;

use keel_core::digest::{BlobDescriptor, DescriptorDigest};
use keel_core::error::{KeelError, Result};
use oci_spec::image::{
    Descriptor, DescriptorBuilder, ImageConfiguration, ImageManifest, ImageManifestBuilder,
    MediaType, RootFsBuilder,
};
use oci_spec::OciSpecError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const V22_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const V22_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const V22_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Reference to a blob from inside a V2.2 or OCI manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDescriptor {
    pub media_type: String,
    pub digest: DescriptorDigest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ContentDescriptor {
    pub fn new(media_type: &str, blob: &BlobDescriptor) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: blob.digest.clone(),
            size: blob.size,
            urls: None,
            annotations: None,
        }
    }
}

/// Docker Image Manifest V2, Schema 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V21Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(default)]
    pub history: Vec<V1Compatibility>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: DescriptorDigest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Compatibility {
    pub v1_compatibility: String,
}

impl V21Manifest {
    /// Layer digests, bottom layer first (schema 1 lists them top first).
    pub fn layer_digests(&self) -> Vec<DescriptorDigest> {
        self.fs_layers
            .iter()
            .rev()
            .map(|layer| layer.blob_sum.clone())
            .collect()
    }
}

/// Docker Image Manifest V2, Schema 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V22Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: ContentDescriptor,
    #[serde(default)]
    pub layers: Vec<ContentDescriptor>,
}

impl V22Manifest {
    pub fn new(config: &BlobDescriptor) -> Self {
        Self {
            schema_version: 2,
            media_type: V22_MANIFEST_MEDIA_TYPE.to_string(),
            config: ContentDescriptor::new(V22_CONFIG_MEDIA_TYPE, config),
            layers: Vec::new(),
        }
    }

    pub fn add_layer(&mut self, layer: &BlobDescriptor) {
        self.layers
            .push(ContentDescriptor::new(V22_LAYER_MEDIA_TYPE, layer));
    }
}

/// OCI image manifest referencing `config` and `layers`, bottom layer
/// first.
pub fn oci_manifest(config: &BlobDescriptor, layers: &[BlobDescriptor]) -> Result<ImageManifest> {
    let layers = layers
        .iter()
        .map(|layer| oci_descriptor(MediaType::ImageLayerGzip, layer))
        .collect::<Result<Vec<_>>>()?;
    ImageManifestBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageManifest)
        .config(oci_descriptor(MediaType::ImageConfig, config)?)
        .layers(layers)
        .build()
        .map_err(oci_error)
}

fn oci_descriptor(media_type: MediaType, blob: &BlobDescriptor) -> Result<Descriptor> {
    DescriptorBuilder::default()
        .media_type(media_type)
        .digest(blob.digest.to_string())
        .size(blob.size as i64)
        .build()
        .map_err(oci_error)
}

fn oci_error(err: OciSpecError) -> KeelError {
    KeelError::SerializationError(err.to_string())
}

/// Any manifest the cache can persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ManifestTemplate {
    V21(V21Manifest),
    V22(V22Manifest),
    Oci(ImageManifest),
}

impl ManifestTemplate {
    pub fn schema_version(&self) -> u32 {
        match self {
            Self::V21(_) => 1,
            Self::V22(_) | Self::Oci(_) => 2,
        }
    }

    /// Whether a container configuration must be stored alongside.
    pub fn requires_config(&self) -> bool {
        self.schema_version() == 2
    }
}

impl From<V21Manifest> for ManifestTemplate {
    fn from(manifest: V21Manifest) -> Self {
        Self::V21(manifest)
    }
}

impl From<V22Manifest> for ManifestTemplate {
    fn from(manifest: V22Manifest) -> Self {
        Self::V22(manifest)
    }
}

impl From<ImageManifest> for ManifestTemplate {
    fn from(manifest: ImageManifest) -> Self {
        Self::Oci(manifest)
    }
}

/// Container configuration (`config.json`).
///
/// Docker V2.2 and OCI share the OCI image configuration layout. Fields
/// outside it are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerConfigTemplate {
    #[serde(flatten)]
    pub image: ImageConfiguration,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<ImageConfiguration> for ContainerConfigTemplate {
    fn from(image: ImageConfiguration) -> Self {
        Self {
            image,
            extra: Map::new(),
        }
    }
}

impl ContainerConfigTemplate {
    pub fn diff_ids(&self) -> &[String] {
        self.image.rootfs().diff_ids()
    }

    /// Append a layer's diff ID to `rootfs.diff_ids`.
    pub fn add_diff_id(&mut self, diff_id: &DescriptorDigest) -> Result<()> {
        let mut diff_ids = self.image.rootfs().diff_ids().clone();
        diff_ids.push(diff_id.to_string());
        let rootfs = RootFsBuilder::default()
            .typ(self.image.rootfs().typ().clone())
            .diff_ids(diff_ids)
            .build()
            .map_err(oci_error)?;
        self.image.set_rootfs(rootfs);
        Ok(())
    }
}

/// A manifest with its configuration (absent for schema 1).
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestAndConfig {
    pub manifest: ManifestTemplate,
    pub config: Option<ContainerConfigTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(byte: &str, size: u64) -> BlobDescriptor {
        BlobDescriptor::new(size, DescriptorDigest::from_hash(&byte.repeat(64)).unwrap())
    }

    #[test]
    fn test_v22_manifest_json_shape() {
        let mut manifest = V22Manifest::new(&blob("a", 10));
        manifest.add_layer(&blob("b", 20));

        let json: Value = serde_json::to_value(ManifestTemplate::from(manifest)).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], V22_MANIFEST_MEDIA_TYPE);
        assert_eq!(json["config"]["mediaType"], V22_CONFIG_MEDIA_TYPE);
        assert_eq!(json["config"]["size"], 10);
        assert_eq!(json["layers"][0]["digest"], format!("sha256:{}", "b".repeat(64)));
        assert!(json["layers"][0].get("urls").is_none());
    }

    #[test]
    fn test_oci_manifest_media_types() {
        let manifest = oci_manifest(&blob("c", 1), &[blob("d", 2)]).unwrap();
        assert_eq!(manifest.layers()[0].size(), 2);
        let template = ManifestTemplate::from(manifest);
        assert_eq!(template.schema_version(), 2);
        assert!(template.requires_config());

        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["mediaType"], OCI_MANIFEST_MEDIA_TYPE);
        assert_eq!(json["config"]["mediaType"], OCI_CONFIG_MEDIA_TYPE);
        assert_eq!(json["layers"][0]["mediaType"], OCI_LAYER_MEDIA_TYPE);
    }

    #[test]
    fn test_v21_manifest_parse() {
        let json = format!(
            r#"{{"schemaVersion":1,"name":"library/busybox","tag":"1","fsLayers":[{{"blobSum":"sha256:{}"}},{{"blobSum":"sha256:{}"}}],"history":[{{"v1Compatibility":"{{}}"}}]}}"#,
            "e".repeat(64),
            "f".repeat(64)
        );
        let manifest: V21Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest.schema_version, 1);
        assert_eq!(manifest.history[0].v1_compatibility, "{}");
        let digests = manifest.layer_digests();
        assert_eq!(digests[0].hash(), "f".repeat(64));
        assert!(!ManifestTemplate::from(manifest).requires_config());
    }

    #[test]
    fn test_container_config_keeps_unknown_fields() {
        let json = format!(
            r#"{{"architecture":"arm64","os":"linux","rootfs":{{"type":"layers","diff_ids":["sha256:{}"]}},"author":"someone","moby.buildkit.info":{{"x":1}}}}"#,
            "a".repeat(64)
        );
        let config: ContainerConfigTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(config.image.author().as_deref(), Some("someone"));
        assert_eq!(config.diff_ids().len(), 1);
        assert_eq!(config.extra.len(), 1);
        assert_eq!(config.extra["moby.buildkit.info"]["x"], 1);

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["architecture"], "arm64");
        assert_eq!(back["author"], "someone");
        assert_eq!(back["moby.buildkit.info"]["x"], 1);
        assert_eq!(back["rootfs"]["type"], "layers");
    }

    #[test]
    fn test_container_config_defaults() {
        let mut config = ContainerConfigTemplate::default();
        let diff_id = DescriptorDigest::from_hash(&"1".repeat(64)).unwrap();
        config.add_diff_id(&diff_id).unwrap();
        assert_eq!(config.diff_ids(), &[diff_id.to_string()]);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["rootfs"]["type"], "layers");
        assert_eq!(json["rootfs"]["diff_ids"][0], diff_id.to_string());
    }

    #[test]
    fn test_oci_manifest_parses_through_template_types() {
        let manifest = oci_manifest(&blob("a", 7), &[blob("b", 8), blob("c", 9)]).unwrap();
        let json = serde_json::to_string(&ManifestTemplate::from(manifest.clone())).unwrap();
        let parsed: ImageManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.config().digest().to_string(), format!("sha256:{}", "a".repeat(64)));
    }
}
