//! CLI command definitions and dispatch.

mod build;
mod digests;
mod inspect;
mod metadata;
mod select;
mod version;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use keel_cache::{entries_recursive, Cache, LayerEntry};
use keel_core::KeelConfig;

/// Keel - daemonless, reproducible container image layers.
#[derive(Parser)]
#[command(name = "keel", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub cache: CacheArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options selecting which cache to operate on.
#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    /// Configuration file (default: ~/.keel/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache root directory, overriding the configuration
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Operate on the base image layers cache
    #[arg(long, global = true, conflicts_with = "application")]
    pub base: bool,

    /// Operate on the application layers cache (default)
    #[arg(long, global = true)]
    pub application: bool,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// List every cached layer
    Digests(digests::DigestsArgs),
    /// Show one cached layer
    Inspect(inspect::InspectArgs),
    /// Compute the selector for a set of entries and resolve it
    Select(select::SelectArgs),
    /// Build a layer from entries unless it is already cached
    Build(build::BuildArgs),
    /// Print the cached manifest and configuration of an image
    Metadata(metadata::MetadataArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Load the configuration named by `args` (or the default one) and apply
/// command line overrides.
pub fn load_config(args: &CacheArgs) -> Result<KeelConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => KeelConfig::load(path)?,
        None => KeelConfig::load_default()?,
    };
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Open the cache selected by `--base` / `--application`.
pub(crate) fn open_cache(args: &CacheArgs, config: &KeelConfig) -> Result<Cache, Box<dyn Error>> {
    let (base, application) = Cache::from_config(config)?;
    Ok(if args.base { base } else { application })
}

/// Run blocking cache work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, Box<dyn Error>>
where
    F: FnOnce() -> keel_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

/// Parse `SOURCE:DESTINATION` arguments into layer entries. A directory
/// source contributes itself and everything below it.
pub(crate) fn parse_entries(specs: &[String]) -> Result<Vec<LayerEntry>, Box<dyn Error>> {
    let mut entries = Vec::new();
    for spec in specs {
        let (source, destination) = spec
            .rsplit_once(':')
            .filter(|(source, destination)| !source.is_empty() && !destination.is_empty())
            .ok_or_else(|| format!("Invalid entry '{spec}': expected SOURCE:DESTINATION"))?;

        entries.extend(entries_recursive(Path::new(source), Path::new(destination))?);
    }
    Ok(entries)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: KeelConfig) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Digests(args) => digests::execute(args, &cli.cache, &config).await,
        Command::Inspect(args) => inspect::execute(args, &cli.cache, &config).await,
        Command::Select(args) => select::execute(args, &cli.cache, &config).await,
        Command::Build(args) => build::execute(args, &cli.cache, &config).await,
        Command::Metadata(args) => metadata::execute(args, &cli.cache, &config).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_cache::DEFAULT_FOLDER_PERMISSIONS;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_single_file_entry() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("app.jar");
        fs::write(&file, "jar").unwrap();

        let entries = parse_entries(&[format!("{}:/app/app.jar", file.display())]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_file(), file);
        assert_eq!(entries[0].extraction_path(), Path::new("/app/app.jar"));
    }

    #[test]
    fn test_parse_directory_entry() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("lib")).unwrap();
        fs::write(tmp.path().join("lib/a.txt"), "a").unwrap();

        let entries = parse_entries(&[format!("{}:/app", tmp.path().display())]).unwrap();
        assert_eq!(entries[0].extraction_path(), Path::new("/app"));
        assert_eq!(entries[0].permissions(), DEFAULT_FOLDER_PERMISSIONS);
        assert!(entries
            .iter()
            .any(|e| e.extraction_path() == Path::new("/app/lib/a.txt")));
    }

    #[test]
    fn test_parse_invalid_entries() {
        assert!(parse_entries(&["no-separator".to_string()]).is_err());
        assert!(parse_entries(&["/src:".to_string()]).is_err());
        assert!(parse_entries(&["/src:relative/path".to_string()]).is_err());
    }

    #[test]
    fn test_load_config_cache_dir_override() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.yaml");
        fs::write(&config_path, "compression_level: 3\n").unwrap();

        let args = CacheArgs {
            config: Some(config_path),
            cache_dir: Some(tmp.path().join("cache")),
            ..CacheArgs::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.cache_dir, tmp.path().join("cache"));
        assert_eq!(config.compression_level, 3);
    }

    #[test]
    fn test_open_cache_selection() {
        let tmp = TempDir::new().unwrap();
        let config = KeelConfig {
            cache_dir: tmp.path().to_path_buf(),
            ..KeelConfig::default()
        };
        let base = open_cache(
            &CacheArgs {
                base: true,
                ..CacheArgs::default()
            },
            &config,
        )
        .unwrap();
        let application = open_cache(&CacheArgs::default(), &config).unwrap();
        assert_eq!(base.directory(), tmp.path().join("base"));
        assert_eq!(application.directory(), tmp.path().join("application"));
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["keel", "digests", "--base", "--cache-dir", "/tmp/c"]).unwrap();
        assert!(cli.cache.base);
        assert_eq!(cli.cache.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(cli.command, Command::Digests(_)));
    }
}
