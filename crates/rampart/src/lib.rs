//! # rampart
//!
//! Declarative, per-method authorization for RPC services.
//!
//! Each method of a service may carry a predicate, a boolean expression over
//! the request (`r`), the caller's permissions (`u`) and named role levels.
//! Predicates are compiled and type-checked once, in parallel, into an
//! immutable [`PolicyStore`]; each call is then authorized against it.
//!
//! ## Overview
//!
//! ```text
//! DescriptorSource ──► PolicyStore::build ──► PolicyStore ──► authorize
//!   (services,           (roles, matchers,      (method key      (pooled
//!    messages)            parallel compile)      → policy)        contexts)
//! ```
//!
//! A method without a predicate is allowed. A predicate that evaluates to
//! `false` denies. A predicate that cannot be evaluated is an [`EvalFault`],
//! which is never mistaken for a denial.
//!
//! ## Modules
//!
//! - [`roles`] - Role registry and reserved names
//! - [`matcher`] - Resource and level matching strategies
//! - [`permission`] - Caller permissions
//! - [`descriptor`] - Service descriptors and the [`Catalog`] source
//! - [`policy`] - Compiler, store, evaluator and context pool
//! - [`guard`] - Transport-neutral call guard
//! - [`reload`] - Hot-swappable store
//! - [`config`] - Build configuration loading
//! - [`observability`] - Tracing setup
//! - [`error`] - Error types

pub mod config;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod matcher;
pub mod observability;
pub mod permission;
pub mod policy;
pub mod reload;
pub mod roles;

pub use config::{ConfigError, RampartConfig};
pub use descriptor::{
    Catalog, CatalogError, DescriptorSource, FieldType, MessageSchema, MethodDescriptor,
    ServiceDescriptor, method_key,
};
pub use error::{
    BuildError, CompileError, DeclarationError, DescriptorError, EvalFault, MatchError,
    PolicyError,
};
pub use guard::{Guard, GuardOptions, Verdict};
pub use matcher::{LevelMatch, LevelMatcher, MatcherConfig, ResourceMatch, ResourceMatcher};
pub use permission::{Permission, PermissionSet};
pub use policy::{BuildOptions, Limits, Policy, PolicyStore, has_all, has_any};
pub use reload::ReloadableStore;
pub use roles::{EDITOR, MANAGER, OWNER, Role, VIEWER, default_roles};
