use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "rampart")]
#[command(about = "Compile and exercise per-method authorization policies")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./rampart.toml when present)
    #[arg(short, long, global = true, env = "RAMPART_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "RAMPART_LOG", default_value = "warn")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a catalog and report every error
    Check(CatalogArgs),
    /// List the compiled policies of a catalog
    List(ListArgs),
    /// Evaluate a single call against a catalog
    Authorize(AuthorizeArgs),
}

#[derive(clap::Args)]
pub struct CatalogArgs {
    /// Catalog file (TOML, or JSON by extension); falls back to `catalog` in the config
    pub catalog: Option<String>,
}

#[derive(clap::Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct AuthorizeArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
    /// Method key, e.g. /acme.library.v1.Library/CreateBook
    #[arg(short, long)]
    pub method: String,
    /// JSON file holding the request message
    #[arg(short, long)]
    pub request: Option<PathBuf>,
    /// JSON file holding the caller's permission list
    #[arg(short, long)]
    pub permissions: Option<PathBuf>,
}
