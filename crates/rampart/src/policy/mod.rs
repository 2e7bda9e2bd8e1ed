//! Policy compilation and evaluation.
//!
//! # Building a store
//!
//! [`PolicyStore::build`] compiles the predicate of every method in a
//! descriptor source:
//!
//! ```ignore
//! use rampart::{BuildOptions, Catalog, PolicyStore};
//!
//! let catalog = Catalog::load("library.toml")?;
//! let store = PolicyStore::build(&catalog, &BuildOptions::default())?;
//! ```
//!
//! A build either succeeds for every method or returns a
//! [`BuildError`](crate::BuildError) listing every problem.
//!
//! # Predicates
//!
//! A predicate is a single boolean expression over:
//!
//! | Name | Type | Meaning |
//! |------|------|---------|
//! | `r` | input message | the request |
//! | `u` | list of permissions | the caller's permissions |
//! | role names | int | e.g. `OWNER`, `EDITOR` |
//! | `hasAny(u, level, [..])` | bool | some requested resource is granted |
//! | `hasAll(u, level, [..])` | bool | every requested resource is granted |
//!
//! # Evaluating
//!
//! ```ignore
//! let allowed = store.authorize("/acme.library.v1.Library/CreateBook", &request, &permissions)?;
//! ```
//!
//! Methods without a predicate are always allowed.

pub mod checker;
pub mod compiler;
pub mod functions;
pub mod pool;
pub mod schema;
pub mod store;

pub use checker::{Checker, Type};
pub use compiler::{BuildOptions, Limits};
pub use functions::{has_all, has_any};
pub use pool::{ContextPool, EvaluationContext, PoolStats, PooledContext};
pub use schema::InputSchema;
pub use store::{Policy, PolicyStore};
