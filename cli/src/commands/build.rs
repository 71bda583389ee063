//! `keel build` command - build a layer unless it is already cached.

use clap::Args;
use keel_core::KeelConfig;

use crate::output;

use super::CacheArgs;

#[derive(Args)]
pub struct BuildArgs {
    /// Layer entries as SOURCE:DESTINATION
    #[arg(required = true)]
    pub entries: Vec<String>,

    /// Only print the layer digest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: BuildArgs,
    cache_args: &CacheArgs,
    config: &KeelConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = super::parse_entries(&args.entries)?;
    let cache = super::open_cache(cache_args, config)?;

    let retrieved = super::blocking(move || cache.retrieve_or_build(entries)).await?;
    let layer = &retrieved.layer;

    if args.quiet {
        println!("{}", layer.digest());
        return Ok(());
    }

    let status = if retrieved.cache_hit { "cached" } else { "built" };
    let mut table = output::new_table(&["STATUS", "DIGEST", "DIFF ID", "SIZE"]);
    table.add_row(vec![
        status.to_string(),
        layer.digest().to_string(),
        layer.diff_id().to_string(),
        output::format_bytes(layer.size()),
    ]);

    println!("{table}");
    Ok(())
}
