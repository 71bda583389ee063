//! `keel select` command.

use clap::Args;
use keel_cache::generate_selector;
use keel_core::KeelConfig;

use super::CacheArgs;

#[derive(Args)]
pub struct SelectArgs {
    /// Layer entries as SOURCE:DESTINATION
    #[arg(required = true)]
    pub entries: Vec<String>,
}

pub async fn execute(
    args: SelectArgs,
    cache_args: &CacheArgs,
    config: &KeelConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = super::parse_entries(&args.entries)?;
    let cache = super::open_cache(cache_args, config)?;

    let (selector, layer) = super::blocking(move || {
        let selector = generate_selector(&entries)?;
        let layer = cache.retrieve(&entries)?;
        Ok((selector, layer))
    })
    .await?;

    println!("Selector: {selector}");
    match layer {
        Some(layer) => println!("Layer:    {}", layer.digest()),
        None => println!("Layer:    not cached"),
    }
    Ok(())
}
