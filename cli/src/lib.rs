//! Keel CLI - inspect and maintain the layer cache.

pub mod commands;
pub mod output;
