use colored::Colorize;
use rampart::{BuildError, PolicyStore};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_denied(msg: &str) {
    println!("{} {}", "✗".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_build_errors(errors: &BuildError) {
    for error in errors.errors() {
        print_error(&error.to_string());
    }
}

pub fn print_policies(store: &PolicyStore, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if store.is_empty() {
                println!("No policies found.");
                return Ok(());
            }
            let mut builder = Builder::default();
            builder.push_record(["Method", "Input", "Predicate"]);
            for key in store.method_keys() {
                if let Some(policy) = store.get(key) {
                    builder.push_record([key, policy.input_type(), policy.predicate()]);
                }
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
            println!("Total: {}", store.len());
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = store
                .method_keys()
                .into_iter()
                .filter_map(|key| store.get(key))
                .map(|policy| {
                    serde_json::json!({
                        "method": policy.method_key(),
                        "input": policy.input_type(),
                        "predicate": policy.predicate(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
