//! Selector digests for sets of layer entries.
//!
//! A selector is the SHA-256 of a canonical JSON list describing the
//! entries, sorted so that input order does not matter. It is recomputed on
//! every lookup from the source files' current modification times, so
//! touching a source file yields a different selector and therefore a cache
//! miss. Content changes that keep the mtime are not detected.

use std::io;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use keel_core::digest::DescriptorDigest;
use keel_core::error::{KeelError, Result};
use serde::{Serialize, Serializer};

use crate::entry::LayerEntry;

/// Canonical description of one entry. Field order is the sort order and
/// the JSON field order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
struct LayerEntryTemplate {
    source_file: String,
    extraction_path: String,
    #[serde(serialize_with = "serialize_instant")]
    last_modified_time: DateTime<Utc>,
    permissions: String,
}

impl LayerEntryTemplate {
    fn from_entry(entry: &LayerEntry) -> Result<Self> {
        let source_file = std::path::absolute(entry.source_file())?;
        let modified = std::fs::metadata(&source_file)
            .and_then(|meta| meta.modified())
            .map_err(|e| source_error(&source_file, e))?;

        Ok(Self {
            source_file: source_file.display().to_string(),
            extraction_path: entry.extraction_path().display().to_string(),
            last_modified_time: DateTime::<Utc>::from(modified),
            permissions: entry.permissions().to_octal_string(),
        })
    }
}

fn serialize_instant<S: Serializer>(
    time: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn source_error(path: &Path, e: io::Error) -> KeelError {
    KeelError::IoError(io::Error::new(
        e.kind(),
        format!(
            "Failed to read modification time of {}: {}",
            path.display(),
            e
        ),
    ))
}

/// Compute the selector for a set of entries.
///
/// Reads each source file's modification time, so the result reflects the
/// filesystem at call time. An empty set hashes the JSON literal `[]`.
pub fn generate_selector(entries: &[LayerEntry]) -> Result<DescriptorDigest> {
    let mut templates = entries
        .iter()
        .map(LayerEntryTemplate::from_entry)
        .collect::<Result<Vec<_>>>()?;
    templates.sort();

    let json = serde_json::to_vec(&templates)?;
    Ok(DescriptorDigest::of_bytes(&json))
}
