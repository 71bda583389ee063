//! Keel Core - Foundational Types
//!
//! Error taxonomy, configuration and content digests shared by the keel
//! layer cache and its command line front end.

pub mod config;
pub mod digest;
pub mod error;

// Re-export commonly used types
pub use config::{KeelConfig, LogLevel};
pub use digest::{BlobDescriptor, DescriptorDigest};
pub use error::{KeelError, Result};

/// Keel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
