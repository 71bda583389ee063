//! `keel metadata` command - cached manifest and configuration as JSON.

use clap::Args;
use keel_cache::ImageReference;
use keel_core::KeelConfig;

use super::CacheArgs;

#[derive(Args)]
pub struct MetadataArgs {
    /// Image reference (e.g. gcr.io/distroless/java:17)
    pub image: String,
}

pub async fn execute(
    args: MetadataArgs,
    cache_args: &CacheArgs,
    config: &KeelConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let cache = super::open_cache(cache_args, config)?;

    let lookup = reference.clone();
    let Some(stored) = super::blocking(move || cache.retrieve_metadata(&lookup)).await? else {
        return Err(format!("No metadata cached for {reference}").into());
    };

    let output = serde_json::json!({
        "Reference": reference.to_string(),
        "SchemaVersion": stored.manifest.schema_version(),
        "Manifest": stored.manifest,
        "Config": stored.config,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
