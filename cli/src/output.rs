//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use keel_core::DescriptorDigest;

/// Hex characters kept by [`short_digest`].
const SHORT_DIGEST_LENGTH: usize = 12;

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `sha256:` followed by the first 12 hex characters, or the full digest
/// when `no_trunc` is set.
pub fn format_digest(digest: &DescriptorDigest, no_trunc: bool) -> String {
    if no_trunc {
        digest.to_string()
    } else {
        format!("sha256:{}", &digest.hash()[..SHORT_DIGEST_LENGTH])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_kilobytes() {
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
    }

    #[test]
    fn test_format_bytes_megabytes() {
        assert_eq!(format_bytes(1048576 + 524288), "1.5 MB");
    }

    #[test]
    fn test_format_bytes_gigabytes() {
        assert_eq!(format_bytes(10 * 1073741824), "10.0 GB");
    }

    #[test]
    fn test_format_digest() {
        let digest = DescriptorDigest::from_hash(&"ab".repeat(32)).unwrap();
        assert_eq!(format_digest(&digest, false), "sha256:abababababab");
        assert_eq!(format_digest(&digest, true), format!("sha256:{}", "ab".repeat(32)));
    }

    #[test]
    fn test_new_table_headers() {
        let mut table = new_table(&["DIGEST", "SIZE"]);
        table.add_row(vec!["sha256:abc", "1 B"]);
        let rendered = table.to_string();
        assert!(rendered.contains("DIGEST"));
        assert!(rendered.contains("sha256:abc"));
    }
}
