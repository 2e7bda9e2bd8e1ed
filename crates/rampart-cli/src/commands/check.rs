use std::path::Path;

use anyhow::{Result, bail};
use rampart::{DescriptorSource, PolicyStore};

use crate::output::{print_build_errors, print_success};

pub fn check(config: Option<&Path>, catalog: Option<&str>) -> Result<()> {
    let loaded = super::load(config, catalog)?;
    let services = loaded.catalog.services().len();
    let methods: usize = loaded.catalog.services().iter().map(|s| s.methods.len()).sum();

    match PolicyStore::build(&loaded.catalog, &loaded.config.build_options()) {
        Ok(store) => {
            print_success(&format!(
                "{}: {} policies compiled ({} methods in {} services)",
                loaded.catalog_path,
                store.len(),
                methods,
                services
            ));
            Ok(())
        }
        Err(errors) => {
            print_build_errors(&errors);
            bail!("{}: {} error(s)", loaded.catalog_path, errors.len())
        }
    }
}
