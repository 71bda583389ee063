//! Lazy byte producers that report the digest of what they wrote.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use keel_core::digest::{BlobDescriptor, DescriptorDigest};
use keel_core::error::{KeelError, Result};
use sha2::{Digest, Sha256};

/// Source of bytes that can be streamed into any writer.
///
/// Implementations produce their content on demand; `write_to` returns the
/// size and SHA-256 of exactly the bytes written to `out`.
pub trait Blob: Send + Sync {
    fn write_to(&self, out: &mut dyn Write) -> Result<BlobDescriptor>;
}

/// Blob backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesBlob {
    data: Vec<u8>,
}

impl BytesBlob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl Blob for BytesBlob {
    fn write_to(&self, out: &mut dyn Write) -> Result<BlobDescriptor> {
        let mut writer = DigestWriter::new(out);
        writer.write_all(&self.data)?;
        Ok(writer.finish().0)
    }
}

/// Blob backed by a file on disk, read when written.
#[derive(Debug, Clone)]
pub struct FileBlob {
    path: PathBuf,
}

impl FileBlob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Blob for FileBlob {
    fn write_to(&self, out: &mut dyn Write) -> Result<BlobDescriptor> {
        let mut file = File::open(&self.path).map_err(|e| {
            KeelError::IoError(io::Error::new(
                e.kind(),
                format!("Failed to open blob {}: {}", self.path.display(), e),
            ))
        })?;
        let mut writer = DigestWriter::new(out);
        io::copy(&mut file, &mut writer)?;
        Ok(writer.finish().0)
    }
}

/// Pass-through writer computing the SHA-256 and length of everything
/// written through it.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish hashing and hand back the inner writer.
    pub fn finish(self) -> (BlobDescriptor, W) {
        let digest = DescriptorDigest::from_hasher(self.hasher);
        (BlobDescriptor::new(self.size, digest), self.inner)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_bytes_blob_descriptor() {
        let mut out = Vec::new();
        let descriptor = BytesBlob::new("hello").write_to(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(descriptor.size, 5);
        assert_eq!(descriptor.digest.hash(), HELLO_HASH);
    }

    #[test]
    fn test_file_blob_descriptor() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        std::fs::write(&path, "hello").unwrap();

        let mut out = Vec::new();
        let descriptor = FileBlob::new(&path).write_to(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(descriptor.digest.hash(), HELLO_HASH);
    }

    #[test]
    fn test_file_blob_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = FileBlob::new(tmp.path().join("gone"))
            .write_to(&mut io::sink())
            .unwrap_err();
        assert!(matches!(err, KeelError::IoError(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_digest_writer_counts_across_writes() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(writer.size(), 5);

        let (descriptor, inner) = writer.finish();
        assert_eq!(inner, b"hello");
        assert_eq!(descriptor.digest.hash(), HELLO_HASH);
    }
}
