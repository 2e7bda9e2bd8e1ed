pub mod authorize;
pub mod check;
pub mod list;

use std::path::Path;

use anyhow::{Context, Result};
use rampart::config::loader::load_config;
use rampart::{Catalog, RampartConfig};

/// Configuration and catalog shared by every subcommand.
pub struct Loaded {
    pub config: RampartConfig,
    pub catalog: Catalog,
    pub catalog_path: String,
}

pub fn load(config: Option<&Path>, catalog: Option<&str>) -> Result<Loaded> {
    let config = load_config(config).context("failed to load configuration")?;
    let catalog_path = config.catalog_path(catalog)?.to_string();
    let catalog = Catalog::load(&catalog_path)?;

    Ok(Loaded {
        config,
        catalog,
        catalog_path,
    })
}
