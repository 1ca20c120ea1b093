//! Gather - fetch sources and pin what was fetched
//!
//! Usage:
//!   gather fetch <SOURCE> <DEST>   # Resolve, classify and fetch a source
//!   gather resolve <SOURCE>        # Expand resolver macros only
//!   gather classify <SOURCE>       # Print the protocol of a resolved source

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gather_core::classify::classify;
use gather_core::config::{GatherConfig, load_config, load_default_config};
use gather_core::context::GatherContext;
use gather_core::expand::expander_for_path;
use gather_core::metadata::{Metadata, scrub_credentials};
use gather_core::service::GatherService;

#[derive(Parser)]
#[command(name = "gather")]
#[command(about = "Fetch policy sources and pin them", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/gather/gather.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, classify and fetch a source into a destination
    Fetch {
        /// Source descriptor, may contain {{ resolver "argument" }} macros
        source: String,
        /// Destination path
        dest: PathBuf,
        /// Follow cluster indirections until content is fetched
        #[arg(long)]
        follow: bool,
        /// Expand a fetched archive into this directory
        #[arg(long, value_name = "DIR")]
        extract: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Expand resolver macros and print the resolved source
    Resolve {
        source: String,
    },

    /// Print the protocol a resolved source is dispatched to
    Classify {
        source: String,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gather=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_cli(cli))
}

fn load(config: Option<&Path>) -> Result<GatherConfig> {
    match config {
        Some(path) => load_config(path),
        None => load_default_config(),
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fetch {
            source,
            dest,
            follow,
            extract,
            timeout,
            format,
        } => {
            let config = load(cli.config.as_deref())?;
            let ctx = match timeout {
                Some(secs) => GatherContext::with_timeout(Duration::from_secs(secs)),
                None => GatherContext::new(),
            };
            run_fetch(&config, &ctx, &source, &dest, follow, extract.as_deref(), format).await?;
        }
        Commands::Resolve { source } => {
            let config = load(cli.config.as_deref())?;
            let service = GatherService::from_config(&config)?;
            let resolved = service.resolve(&GatherContext::new(), &source).await?;
            println!("{}", resolved);
        }
        Commands::Classify { source } => {
            println!("{}", classify(&source)?);
        }
    }

    Ok(())
}

async fn run_fetch(
    config: &GatherConfig,
    ctx: &GatherContext,
    source: &str,
    dest: &Path,
    follow: bool,
    extract: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let service = GatherService::from_config(config)?;

    let (metadata, chain) = if follow {
        let gathered = service.gather_following(ctx, source, dest).await?;
        let chain: Vec<String> = gathered
            .chain
            .iter()
            .map(|reference| scrub_credentials(reference))
            .collect();
        (gathered.metadata, chain)
    } else {
        let metadata = service.gather(ctx, source, dest).await?;
        (metadata, Vec::new())
    };

    if let Some(extract_dir) = extract {
        let archive = fetched_file(&metadata).ok_or_else(|| {
            anyhow::anyhow!("Nothing to extract from a {} source", metadata.protocol())
        })?;
        let expander = expander_for_path(&archive)
            .ok_or_else(|| anyhow::anyhow!("No expander for {}", archive.display()))?;
        expander.expand(&archive, extract_dir)?;
    }

    match format {
        OutputFormat::Table => print_table(&metadata, &chain),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "protocol": metadata.protocol(),
                "attributes": metadata.get(),
                "pinned": metadata.pinned_url().ok(),
                "chain": chain,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Local file written by a file or HTTP gather.
fn fetched_file(metadata: &Metadata) -> Option<PathBuf> {
    match metadata {
        Metadata::File(file) if file.path.is_file() => Some(file.path.clone()),
        Metadata::Http(http) => Some(http.destination.clone()),
        _ => None,
    }
}

fn print_table(metadata: &Metadata, chain: &[String]) {
    println!("Protocol: {}", metadata.protocol());
    for (key, value) in metadata.get() {
        match value {
            serde_json::Value::String(s) => println!("  {}: {}", key, s),
            other => println!("  {}: {}", key, other),
        }
    }
    match metadata.pinned_url() {
        Ok(pinned) => println!("Pinned: {}", pinned),
        Err(err) => println!("Pinned: (unavailable: {})", err),
    }
    if chain.len() > 1 {
        println!("Followed:");
        for reference in chain {
            println!("  {}", reference);
        }
    }
}
