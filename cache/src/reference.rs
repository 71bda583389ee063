//! Image reference parsing.
//!
//! Parses references like `gcr.io/distroless/java:17` into structured
//! components. The qualified string form decides where image metadata lives
//! inside the cache.

use keel_core::digest::DescriptorDigest;
use keel_core::error::{KeelError, Result};

/// Registry used when none is specified.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Host names that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", DEFAULT_REGISTRY];

/// Tag used when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, with optional port
    pub registry: String,
    /// Repository path (e.g., "library/openjdk", "distroless/java")
    pub repository: String,
    /// Tag (e.g., "latest", "17")
    pub tag: Option<String>,
    /// Manifest digest
    pub digest: Option<DescriptorDigest>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `openjdk` → registry-1.docker.io/library/openjdk:latest
    /// - `openjdk:17` → registry-1.docker.io/library/openjdk:17
    /// - `myuser/myimage` → registry-1.docker.io/myuser/myimage:latest
    /// - `gcr.io/org/image:tag` → gcr.io/org/image:tag
    /// - `gcr.io/org/image@sha256:abc...` → gcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(KeelError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest_part)) => {
                let digest = DescriptorDigest::from_digest(digest_part).map_err(|_| {
                    KeelError::InvalidReference(format!(
                        "Invalid digest in reference '{}': expected sha256:<64 hex characters>",
                        reference
                    ))
                })?;
                (name_tag, Some(digest))
            }
            None => (reference, None),
        };

        // The tag separator is the last ':' after the last '/'; anything
        // before a '/' may be a registry port.
        let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = &tag {
            if tag.is_empty() {
                return Err(KeelError::InvalidReference(format!(
                    "Empty tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if name.is_empty() {
            return Err(KeelError::InvalidReference(
                "Empty repository name".to_string(),
            ));
        }

        // The first component is a registry if it looks like a hostname
        // (contains a dot or a port, or is "localhost").
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(KeelError::InvalidReference(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                let registry = if DOCKER_HUB_ALIASES.contains(&first) {
                    DEFAULT_REGISTRY.to_string()
                } else {
                    first.to_string()
                };
                let repository = Self::hub_repository(&registry, rest);
                return Ok((registry, repository));
            }
        }

        Ok((
            DEFAULT_REGISTRY.to_string(),
            Self::hub_repository(DEFAULT_REGISTRY, name),
        ))
    }

    /// Official Docker Hub images live under `library/`.
    fn hub_repository(registry: &str, repository: &str) -> String {
        if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        }
    }

    /// `registry/repository@digest` when a digest is known, otherwise
    /// `registry/repository:tag`.
    pub fn to_string_with_qualifier(&self) -> String {
        let base = format!("{}/{}", self.registry, self.repository);
        match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}@{}", base, digest),
            (None, Some(tag)) => format!("{}:{}", base, tag),
            (None, None) => format!("{}:{}", base, DEFAULT_TAG),
        }
    }

    /// Get the full reference string, including both tag and digest.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(&digest.to_string());
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
