//! Layer entries: one filesystem object to place in a layer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keel_core::error::{KeelError, Result};

/// Timestamp written for synthesized directories and entries that do not
/// specify one: one second after the epoch.
pub fn default_modification_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1)
}

/// POSIX rwx permission bits (owner, group, other).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilePermissions(u32);

/// Permissions given to regular files by default (`644`).
pub const DEFAULT_FILE_PERMISSIONS: FilePermissions = FilePermissions(0o644);

/// Permissions given to directories by default (`755`).
pub const DEFAULT_FOLDER_PERMISSIONS: FilePermissions = FilePermissions(0o755);

impl FilePermissions {
    /// Create from a mode integer; only the low 9 bits are allowed.
    pub fn from_mode(mode: u32) -> Result<Self> {
        if mode > 0o777 {
            return Err(KeelError::LayerBuild(format!(
                "permissions {:o} exceed 777",
                mode
            )));
        }
        Ok(Self(mode))
    }

    /// Parse a three digit octal string such as `"644"`.
    pub fn from_octal_string(octal: &str) -> Result<Self> {
        if octal.len() != 3 || !octal.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(KeelError::LayerBuild(format!(
                "'{}' is not a valid octal permission string",
                octal
            )));
        }
        let mode = u32::from_str_radix(octal, 8)
            .map_err(|e| KeelError::LayerBuild(format!("invalid permissions '{}': {}", octal, e)))?;
        Self::from_mode(mode)
    }

    /// Three digit octal form, e.g. `"755"`.
    pub fn to_octal_string(&self) -> String {
        format!("{:03o}", self.0)
    }

    pub fn mode(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FilePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_octal_string())
    }
}

/// A single file or directory to place in a layer.
///
/// `modification_time` is the timestamp written into the tar record. It is
/// independent of the source file's real mtime, which only
/// feeds the selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerEntry {
    source_file: PathBuf,
    extraction_path: PathBuf,
    permissions: FilePermissions,
    modification_time: SystemTime,
}

impl LayerEntry {
    pub fn new(
        source_file: impl Into<PathBuf>,
        extraction_path: impl Into<PathBuf>,
        permissions: FilePermissions,
        modification_time: SystemTime,
    ) -> Result<Self> {
        let extraction_path = extraction_path.into();
        if !extraction_path.is_absolute() {
            return Err(KeelError::LayerBuild(format!(
                "extraction path {} must be absolute",
                extraction_path.display()
            )));
        }
        Ok(Self {
            source_file: source_file.into(),
            extraction_path,
            permissions,
            modification_time,
        })
    }

    /// Entry with default permissions (chosen by file type) and modification time.
    pub fn with_defaults(
        source_file: impl Into<PathBuf>,
        extraction_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source_file = source_file.into();
        let permissions = if source_file.is_dir() {
            DEFAULT_FOLDER_PERMISSIONS
        } else {
            DEFAULT_FILE_PERMISSIONS
        };
        Self::new(
            source_file,
            extraction_path,
            permissions,
            default_modification_time(),
        )
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn extraction_path(&self) -> &Path {
        &self.extraction_path
    }

    pub fn permissions(&self) -> FilePermissions {
        self.permissions
    }

    pub fn modification_time(&self) -> SystemTime {
        self.modification_time
    }
}

/// Entries for a whole directory tree copied to `extraction_root`.
///
/// Includes `source_dir` itself. Directory listings are sorted so the
/// returned order does not depend on the filesystem. Symbolic links are
/// followed: a link to a directory is walked like the directory itself.
pub fn entries_recursive(source_dir: &Path, extraction_root: &Path) -> Result<Vec<LayerEntry>> {
    let mut entries = vec![LayerEntry::with_defaults(source_dir, extraction_root)?];
    if source_dir.is_dir() {
        walk_dir(source_dir, extraction_root, &mut entries)?;
    }
    Ok(entries)
}

fn walk_dir(current: &Path, extraction_dir: &Path, entries: &mut Vec<LayerEntry>) -> Result<()> {
    let mut children = std::fs::read_dir(current)
        .map_err(|e| {
            KeelError::LayerBuild(format!(
                "Failed to read directory {}: {}",
                current.display(),
                e
            ))
        })?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();

    for path in children {
        let Some(name) = path.file_name() else {
            continue;
        };
        let extraction_path = extraction_dir.join(name);
        entries.push(LayerEntry::with_defaults(&path, &extraction_path)?);
        if path.is_dir() {
            walk_dir(&path, &extraction_path, entries)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_permissions_octal_round() {
        let perms = FilePermissions::from_octal_string("644").unwrap();
        assert_eq!(perms.mode(), 0o644);
        assert_eq!(perms.to_octal_string(), "644");
        assert_eq!(FilePermissions::from_mode(0o7).unwrap().to_octal_string(), "007");
    }

    #[test]
    fn test_permissions_rejects_invalid() {
        assert!(FilePermissions::from_octal_string("888").is_err());
        assert!(FilePermissions::from_octal_string("7777").is_err());
        assert!(FilePermissions::from_octal_string("rw-").is_err());
        assert!(FilePermissions::from_mode(0o1000).is_err());
    }

    #[test]
    fn test_default_permissions() {
        assert_eq!(DEFAULT_FILE_PERMISSIONS.to_string(), "644");
        assert_eq!(DEFAULT_FOLDER_PERMISSIONS.to_string(), "755");
    }

    #[test]
    fn test_default_modification_time() {
        assert_eq!(
            default_modification_time().duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_layer_entry_requires_absolute_extraction_path() {
        let err = LayerEntry::new(
            "/src/file",
            "relative/path",
            DEFAULT_FILE_PERMISSIONS,
            UNIX_EPOCH,
        )
        .unwrap_err();
        assert!(matches!(err, KeelError::LayerBuild(_)));
    }

    #[test]
    fn test_layer_entry_equality() {
        let a = LayerEntry::new("/a", "/x", DEFAULT_FILE_PERMISSIONS, UNIX_EPOCH).unwrap();
        let b = LayerEntry::new("/a", "/x", DEFAULT_FILE_PERMISSIONS, UNIX_EPOCH).unwrap();
        let c = LayerEntry::new("/a", "/x", DEFAULT_FOLDER_PERMISSIONS, UNIX_EPOCH).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_with_defaults_picks_permissions_by_type() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.txt");
        fs::write(&file, "data").unwrap();

        let dir_entry = LayerEntry::with_defaults(tmp.path(), "/app").unwrap();
        let file_entry = LayerEntry::with_defaults(&file, "/app/file.txt").unwrap();
        assert_eq!(dir_entry.permissions(), DEFAULT_FOLDER_PERMISSIONS);
        assert_eq!(file_entry.permissions(), DEFAULT_FILE_PERMISSIONS);
        assert_eq!(file_entry.modification_time(), default_modification_time());
    }

    #[test]
    fn test_entries_recursive() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("b.txt"), "b").unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("lib").join("util.py"), "pass").unwrap();

        let entries = entries_recursive(&src, Path::new("/app")).unwrap();
        let paths: Vec<_> = entries
            .iter()
            .map(|e| e.extraction_path().to_path_buf())
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/app"),
                PathBuf::from("/app/a.txt"),
                PathBuf::from("/app/b.txt"),
                PathBuf::from("/app/lib"),
                PathBuf::from("/app/lib/util.py"),
            ]
        );
        assert_eq!(entries[3].permissions(), DEFAULT_FOLDER_PERMISSIONS);
    }

    #[test]
    fn test_entries_recursive_single_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("only.txt");
        fs::write(&file, "x").unwrap();

        let entries = entries_recursive(&file, Path::new("/only.txt")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_file(), file.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_recursive_follows_directory_symlinks() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("inner.txt"), "inner").unwrap();
        let tree = tmp.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        std::os::unix::fs::symlink(&real, tree.join("linked")).unwrap();

        let entries = entries_recursive(&tree, Path::new("/app")).unwrap();
        let paths: Vec<_> = entries
            .iter()
            .map(|e| e.extraction_path().to_path_buf())
            .collect();
        assert!(paths.contains(&PathBuf::from("/app/linked")));
        assert!(paths.contains(&PathBuf::from("/app/linked/inner.txt")));
    }
}
