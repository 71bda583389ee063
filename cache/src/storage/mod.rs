//! On-disk cache storage: path layout, reader and writer.

pub mod files;
pub mod reader;
pub mod writer;

pub use files::CacheStorageFiles;
pub use reader::CacheStorageReader;
pub use writer::{CacheStorageWriter, DEFAULT_COMPRESSION_LEVEL};
