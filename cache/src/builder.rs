//! Reproducible layer archives.
//!
//! Given the same entries (paths, permissions, timestamps) the produced tar
//! stream is bit-identical regardless of machine, OS or input order:
//! records are deduplicated by extraction path, parent directories are
//! synthesized with fixed metadata, records are sorted by path, and owner
//! fields are cleared.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use keel_core::digest::BlobDescriptor;
use keel_core::error::{KeelError, Result};
use tar::{EntryType, Header};

use crate::blob::{Blob, DigestWriter};
use crate::entry::{default_modification_time, FilePermissions, LayerEntry, DEFAULT_FOLDER_PERMISSIONS};

/// What a tar record carries.
#[derive(Debug, Clone)]
enum RecordSource {
    /// Directory record (explicit or synthesized); no content
    Directory,
    /// Regular file whose content is read from disk when written
    File(PathBuf),
}

/// One record of the output archive.
#[derive(Debug, Clone)]
struct TarRecord {
    /// Archive path, relative (no leading `/`)
    name: String,
    source: RecordSource,
    permissions: FilePermissions,
    modification_time: SystemTime,
}

/// Records unique by archive path, with ancestors synthesized on insert.
#[derive(Default)]
struct UniqueTarRecords {
    names: HashSet<String>,
    records: Vec<TarRecord>,
}

impl UniqueTarRecords {
    /// Add `record`, first creating any ancestor directories not yet present.
    /// A path that is already present keeps its first record.
    fn add(&mut self, record: TarRecord) {
        for ancestor in ancestors_of(&record.name) {
            if self.names.insert(ancestor.clone()) {
                self.records.push(TarRecord {
                    name: ancestor,
                    source: RecordSource::Directory,
                    permissions: DEFAULT_FOLDER_PERMISSIONS,
                    modification_time: default_modification_time(),
                });
            }
        }
        if self.names.insert(record.name.clone()) {
            self.records.push(record);
        }
    }

    fn into_sorted(mut self) -> Vec<TarRecord> {
        self.records.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        self.records
    }
}

/// Proper ancestors of a relative archive path, outermost first.
fn ancestors_of(name: &str) -> Vec<String> {
    name.match_indices('/')
        .map(|(index, _)| name[..index].to_string())
        .collect()
}

/// Relative archive name for an absolute extraction path.
fn archive_name(extraction_path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in extraction_path.components() {
        match component {
            Component::RootDir => {}
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                KeelError::LayerBuild(format!(
                    "extraction path {} is not valid UTF-8",
                    extraction_path.display()
                ))
            })?),
            _ => {
                return Err(KeelError::LayerBuild(format!(
                    "extraction path {} must be absolute and normalized",
                    extraction_path.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(KeelError::LayerBuild(
            "extraction path / cannot be a layer entry".to_string(),
        ));
    }
    Ok(parts.join("/"))
}

/// Builds reproducible tar archives from layer entries.
#[derive(Debug, Clone)]
pub struct ReproducibleLayerBuilder {
    entries: Vec<LayerEntry>,
}

impl ReproducibleLayerBuilder {
    pub fn new(entries: Vec<LayerEntry>) -> Self {
        Self { entries }
    }

    /// Produce the (uncompressed) layer blob.
    ///
    /// Source files are only opened when the blob is written, so a file
    /// that disappears after this call surfaces as an I/O error then.
    /// Symbolic links are followed: a link is archived as a copy of its
    /// target, never as a link entry.
    pub fn build(&self) -> Result<LayerBlob> {
        let mut explicit = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let source = if entry.source_file().is_dir() {
                RecordSource::Directory
            } else {
                RecordSource::File(entry.source_file().to_path_buf())
            };
            explicit.push(TarRecord {
                name: archive_name(entry.extraction_path())?,
                source,
                permissions: entry.permissions(),
                modification_time: entry.modification_time(),
            });
        }
        // Stable sort: among duplicate paths the first input entry wins, and
        // an explicit directory is seen before any child synthesizes it.
        explicit.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let mut unique = UniqueTarRecords::default();
        for record in explicit {
            unique.add(record);
        }

        Ok(LayerBlob {
            records: unique.into_sorted(),
        })
    }
}

/// Uncompressed layer archive, produced lazily when written.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    records: Vec<TarRecord>,
}

impl LayerBlob {
    /// Archive paths in output order.
    pub fn paths(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }
}

impl Blob for LayerBlob {
    fn write_to(&self, out: &mut dyn Write) -> Result<BlobDescriptor> {
        let mut archive = tar::Builder::new(DigestWriter::new(out));

        for record in &self.records {
            let mut header = Header::new_gnu();
            header.set_mode(record.permissions.mode());
            header.set_mtime(unix_seconds(record.modification_time));
            header.set_uid(0);
            header.set_gid(0);
            header.set_username("")?;
            header.set_groupname("")?;

            match &record.source {
                RecordSource::Directory => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_size(0);
                    archive.append_data(&mut header, &record.name, io::empty())?;
                }
                RecordSource::File(path) => {
                    let file = File::open(path).map_err(|e| {
                        KeelError::IoError(io::Error::new(
                            e.kind(),
                            format!("Failed to open layer entry source {}: {}", path.display(), e),
                        ))
                    })?;
                    header.set_entry_type(EntryType::Regular);
                    header.set_size(file.metadata()?.len());
                    archive.append_data(&mut header, &record.name, file)?;
                }
            }
        }

        let writer = archive.into_inner()?;
        Ok(writer.finish().0)
    }
}

/// Whole seconds since the epoch; earlier times clamp to zero.
fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
