use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use rampart::{Guard, Permission, PolicyStore, ReloadableStore, Verdict};
use serde_json::Value;

use crate::cli::AuthorizeArgs;
use crate::output::{print_build_errors, print_denied, print_error, print_success};

/// Exit status for a denied call.
const DENIED: u8 = 2;

pub fn authorize(config: Option<&Path>, args: &AuthorizeArgs) -> Result<ExitCode> {
    let loaded = super::load(config, args.catalog.catalog.as_deref())?;

    let store = match PolicyStore::build(&loaded.catalog, &loaded.config.build_options()) {
        Ok(store) => store,
        Err(errors) => {
            print_build_errors(&errors);
            bail!("{}: {} error(s)", loaded.catalog_path, errors.len())
        }
    };
    let guard = Guard::with_options(ReloadableStore::new(store), loaded.config.guard_options());

    let request = match &args.request {
        Some(path) => read_json::<Value>(path)?,
        None => Value::Object(Default::default()),
    };
    let permissions = || match &args.permissions {
        Some(path) => read_json::<Vec<Permission>>(path),
        None => Ok(Vec::new()),
    };

    let code = match guard.check(&args.method, &request, permissions)? {
        Verdict::Allowed => {
            print_success(&format!("{}: allowed", args.method));
            ExitCode::SUCCESS
        }
        Verdict::Denied => {
            print_denied(&format!("{}: denied", args.method));
            ExitCode::from(DENIED)
        }
        Verdict::Fault(fault) => {
            print_error(&fault.to_string());
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}
