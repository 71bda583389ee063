//! `keel inspect` command - one cached layer as JSON.

use clap::Args;
use keel_core::{DescriptorDigest, KeelConfig};

use super::CacheArgs;

#[derive(Args)]
pub struct InspectArgs {
    /// Layer digest (`sha256:<hex>` or bare hex)
    pub digest: String,
}

pub async fn execute(
    args: InspectArgs,
    cache_args: &CacheArgs,
    config: &KeelConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let digest = parse_digest(&args.digest)?;
    let cache = super::open_cache(cache_args, config)?;
    let directory = cache.directory().to_path_buf();

    let lookup = digest.clone();
    let Some(layer) = super::blocking(move || cache.retrieve_by_digest(&lookup)).await? else {
        return Err(format!("Layer not cached: {digest}").into());
    };

    let output = serde_json::json!({
        "Digest": layer.digest().to_string(),
        "DiffId": layer.diff_id().to_string(),
        "Size": layer.size(),
        "Path": directory
            .join("layers")
            .join(layer.digest().hash())
            .join(layer.diff_id().hash()),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_digest(value: &str) -> keel_core::Result<DescriptorDigest> {
    if value.contains(':') {
        DescriptorDigest::from_digest(value)
    } else {
        DescriptorDigest::from_hash(value)
    }
}
