//! # spvm
//!
//! Command-line front end for inspecting compiled SourcePawn plugins.
//!
//! ```bash
//! # Summarize an image
//! spvm inspect plugins/admin.smx
//!
//! # Same, as JSON
//! spvm inspect plugins/admin.smx --json
//!
//! # List discoverable plugins, scanning ./plugins first
//! spvm list --dir ./plugins
//! ```
//!
//! Log output goes to stderr. `RUST_LOG` overrides the configured level.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sourcepawn_host::inspect::ImageSummary;
use sourcepawn_host::{discover_plugins, HostConfig};
use sourcepawn_runtime::PluginImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spvm", version, about = "SourcePawn plugin tools")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/sourcepawn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header, sections and symbol tables of a plugin image
    Inspect {
        /// Path to a .smx file
        path: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List plugins found in the plugin directories
    List {
        /// Directory scanned before the configured and default ones
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::load_default().unwrap_or_else(|e| {
            eprintln!("Failed to load config, using defaults: {:#}", e);
            HostConfig::default()
        }),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .init();

    debug!("spvm v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Inspect { path, json } => inspect(&path, json),
        Commands::List { dir } => list(dir.or(config.plugins.directory)),
    }
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let image = PluginImage::load_file(path)
        .with_context(|| format!("Failed to load plugin image: {}", path.display()))?;
    info!(
        "Loaded {} ({} sections)",
        path.display(),
        image.sections().len()
    );

    let summary = ImageSummary::from_image(&image);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render_text());
    }
    Ok(())
}

fn list(dir: Option<PathBuf>) -> Result<()> {
    let plugins = discover_plugins(dir.as_deref())?;
    info!("Discovered {} plugin(s)", plugins.len());

    for (i, plugin) in plugins.iter().enumerate() {
        let size = plugin.size().unwrap_or(0);
        println!(
            "{:>3}  {:<32} {:>8}  {}",
            i + 1,
            plugin.filename,
            size,
            plugin.path.display()
        );
    }
    Ok(())
}
