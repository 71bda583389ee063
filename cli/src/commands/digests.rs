//! `keel digests` command.

use clap::Args;
use keel_core::KeelConfig;

use crate::output;

use super::CacheArgs;

#[derive(Args)]
pub struct DigestsArgs {
    /// Only show digests (one per line)
    #[arg(short, long)]
    pub quiet: bool,

    /// Show full digests
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(
    args: DigestsArgs,
    cache_args: &CacheArgs,
    config: &KeelConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let cache = super::open_cache(cache_args, config)?;

    let layers = super::blocking(move || {
        let mut layers = Vec::new();
        for digest in cache.cached_digests()? {
            if let Some(layer) = cache.retrieve_by_digest(&digest)? {
                layers.push(layer);
            }
        }
        Ok(layers)
    })
    .await?;

    if args.quiet {
        for layer in &layers {
            println!("{}", layer.digest());
        }
        return Ok(());
    }

    let mut table = output::new_table(&["DIGEST", "DIFF ID", "SIZE"]);
    for layer in &layers {
        table.add_row(vec![
            output::format_digest(layer.digest(), args.no_trunc),
            output::format_digest(layer.diff_id(), args.no_trunc),
            output::format_bytes(layer.size()),
        ]);
    }

    println!("{table}");
    Ok(())
}
