//! Configuration for building policy stores.
//!
//! ```toml
//! catalog = "library.toml"
//!
//! [[roles]]
//! name = "ADMIN"
//! value = 0
//!
//! [matcher.resource]
//! kind = "regex"
//!
//! [matcher.level]
//! kind = "ordered"
//! ascending = false
//!
//! [compiler]
//! workers = 4
//!
//! [limits]
//! max_operations = 5000
//! ```
//!
//! Every section is optional. Environment variables override file values,
//! e.g. `RAMPART__MATCHER__RESOURCE__KIND=glob`.

use serde::{Deserialize, Serialize};

use crate::guard::GuardOptions;
use crate::matcher::{LevelMatch, MatcherConfig, ResourceMatch};
use crate::policy::{BuildOptions, Limits};
use crate::roles::{Role, default_roles};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RampartConfig {
    /// Path of the descriptor catalog.
    #[serde(default)]
    pub catalog: Option<String>,
    /// Role table; the built-in roles when absent.
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
    #[serde(default)]
    pub matcher: MatcherSettings,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub guard: GuardConfig,
}

impl RampartConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roles.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigError::InvalidValue(
                "roles must not be empty when set".into(),
            ));
        }
        if self.compiler.workers == 0 {
            return Err(ConfigError::InvalidValue(
                "compiler.workers must be > 0".into(),
            ));
        }

        if self.limits.max_operations == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.max_operations must be > 0".into(),
            ));
        }
        let limits = [
            ("limits.max_expr_depth", self.limits.max_expr_depth),
            ("limits.max_string_size", self.limits.max_string_size),
            ("limits.max_array_size", self.limits.max_array_size),
            ("limits.max_map_size", self.limits.max_map_size),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.matcher.resource.literal_separator && self.matcher.resource.kind != ResourceKind::Glob {
            return Err(ConfigError::InvalidValue(
                "matcher.resource.literal_separator only applies to kind = \"glob\"".into(),
            ));
        }
        if self.matcher.level.ascending && self.matcher.level.kind != LevelKind::Ordered {
            return Err(ConfigError::InvalidValue(
                "matcher.level.ascending only applies to kind = \"ordered\"".into(),
            ));
        }

        Ok(())
    }

    /// Catalog path, preferring `explicit` over the configured one.
    pub fn catalog_path<'a>(&'a self, explicit: Option<&'a str>) -> Result<&'a str, ConfigError> {
        explicit
            .or(self.catalog.as_deref())
            .ok_or_else(|| ConfigError::Missing("catalog".into()))
    }

    /// Options for [`PolicyStore::build`](crate::PolicyStore::build).
    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            roles: self.roles.clone().unwrap_or_else(default_roles),
            matchers: MatcherConfig::new(self.matcher.resource.build(), self.matcher.level.build()).into(),
            workers: self.compiler.workers,
            limits: self.limits.to_limits(),
            max_idle: self.pool.max_idle,
        }
    }

    #[must_use]
    pub fn guard_options(&self) -> GuardOptions {
        GuardOptions {
            skip: self.guard.skip,
        }
    }
}

// =============================================================================
// Matchers
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatcherSettings {
    #[serde(default)]
    pub resource: ResourceMatcherConfig,
    #[serde(default)]
    pub level: LevelMatcherConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Exact,
    Prefix,
    Regex,
    #[default]
    Glob,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceMatcherConfig {
    #[serde(default)]
    pub kind: ResourceKind,
    /// Glob only: `*` and `?` do not cross `/`.
    #[serde(default)]
    pub literal_separator: bool,
}

impl ResourceMatcherConfig {
    fn build(&self) -> ResourceMatch {
        match self.kind {
            ResourceKind::Exact => ResourceMatch::Exact,
            ResourceKind::Prefix => ResourceMatch::Prefix,
            ResourceKind::Regex => ResourceMatch::regex(),
            ResourceKind::Glob if self.literal_separator => ResourceMatch::glob_with_literal_separator(),
            ResourceKind::Glob => ResourceMatch::glob(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Exact,
    #[default]
    Ordered,
    Bitmask,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LevelMatcherConfig {
    #[serde(default)]
    pub kind: LevelKind,
    /// Ordered only: a larger owned level satisfies a smaller requirement.
    #[serde(default)]
    pub ascending: bool,
}

impl LevelMatcherConfig {
    fn build(&self) -> LevelMatch {
        match self.kind {
            LevelKind::Exact => LevelMatch::Exact,
            LevelKind::Ordered => LevelMatch::Ordered {
                ascending: self.ascending,
            },
            LevelKind::Bitmask => LevelMatch::BitMask,
        }
    }
}

// =============================================================================
// Compiler, limits, pool, guard
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
    #[serde(default = "default_max_collection_size")]
    pub max_array_size: usize,
    #[serde(default = "default_max_collection_size")]
    pub max_map_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_collection_size(),
            max_map_size: default_max_collection_size(),
        }
    }
}

impl LimitsConfig {
    fn to_limits(&self) -> Limits {
        Limits {
            max_operations: self.max_operations,
            max_expr_depth: self.max_expr_depth,
            max_string_size: self.max_string_size,
            max_array_size: self.max_array_size,
            max_map_size: self.max_map_size,
        }
    }
}

fn default_max_operations() -> u64 {
    10_000
}
fn default_max_expr_depth() -> usize {
    64
}
fn default_max_string_size() -> usize {
    10_000
}
fn default_max_collection_size() -> usize {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle(),
        }
    }
}

fn default_max_idle() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardConfig {
    /// Allow every call without evaluating policies.
    #[serde(default)]
    pub skip: bool,
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

// =============================================================================
// Loader
// =============================================================================

pub mod loader {
    use super::{ConfigError, RampartConfig};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Load configuration from an optional TOML file plus `RAMPART__*`
    /// environment overrides, then validate it.
    ///
    /// An explicitly named file must exist; without one, `rampart.toml` in
    /// the working directory is used when present.
    pub fn load_config(path: Option<&Path>) -> Result<RampartConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(File::from(p.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from("rampart.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., RAMPART__COMPILER__WORKERS=8
        builder = builder.add_source(
            Environment::with_prefix("RAMPART")
                .try_parsing(true)
                .separator("__"),
        );

        let merged: RampartConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
