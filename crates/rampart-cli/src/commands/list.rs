use std::path::Path;

use anyhow::{Result, bail};
use rampart::PolicyStore;

use crate::cli::OutputFormat;
use crate::output::{print_build_errors, print_policies};

pub fn list(config: Option<&Path>, catalog: Option<&str>, format: OutputFormat) -> Result<()> {
    let loaded = super::load(config, catalog)?;

    let store = match PolicyStore::build(&loaded.catalog, &loaded.config.build_options()) {
        Ok(store) => store,
        Err(errors) => {
            print_build_errors(&errors);
            bail!("{}: {} error(s)", loaded.catalog_path, errors.len())
        }
    };

    print_policies(&store, format)
}
