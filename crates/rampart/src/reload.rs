//! Hot-swappable policy store.
//!
//! # Usage
//!
//! ```ignore
//! use rampart::{BuildOptions, Catalog, ReloadableStore};
//!
//! let store = ReloadableStore::build(&catalog, &options)?;
//!
//! // Request path: one atomic load, never blocks
//! let allowed = store.store().authorize(method, &request, &permissions)?;
//!
//! // Catalog changed
//! store.rebuild(&Catalog::load("library.toml")?, &options)?;
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::descriptor::DescriptorSource;
use crate::error::BuildError;
use crate::policy::{BuildOptions, PolicyStore};

/// A [`PolicyStore`] behind an `ArcSwap`.
///
/// Readers take a snapshot with [`store`](Self::store) and keep evaluating
/// against it even while a rebuild swaps in a new one.
#[derive(Clone)]
pub struct ReloadableStore {
    inner: Arc<ArcSwap<PolicyStore>>,
}

impl ReloadableStore {
    #[must_use]
    pub fn new(store: PolicyStore) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(store)),
        }
    }

    /// Build the initial store.
    pub fn build<S>(source: &S, options: &BuildOptions) -> Result<Self, BuildError>
    where
        S: DescriptorSource + ?Sized,
    {
        PolicyStore::build(source, options).map(Self::new)
    }

    /// Snapshot of the current store (lock-free).
    #[must_use]
    pub fn store(&self) -> Arc<PolicyStore> {
        self.inner.load_full()
    }

    /// Compile `source` and swap the result in.
    ///
    /// On failure the current store stays active and the errors are returned.
    pub fn rebuild<S>(&self, source: &S, options: &BuildOptions) -> Result<(), BuildError>
    where
        S: DescriptorSource + ?Sized,
    {
        info!("Rebuilding policy store");

        match PolicyStore::build(source, options) {
            Ok(store) => {
                let policies = store.len();
                self.inner.store(Arc::new(store));
                info!(policies, "Policy store reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(errors = e.len(), "Policy store rebuild failed, keeping previous store");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ReloadableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableStore")
            .field("policies", &self.inner.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Catalog, FieldType, MessageSchema, MethodDescriptor, ServiceDescriptor};
    use serde_json::json;

    fn catalog(predicate: &str) -> Catalog {
        Catalog::new()
            .with_service(
                ServiceDescriptor::new("acme.v1.Svc")
                    .with_method(MethodDescriptor::new("Do", "acme.v1.Req").with_predicate(predicate)),
            )
            .with_message(MessageSchema::new("acme.v1.Req").with_field("n", FieldType::Int))
    }

    #[test]
    fn test_rebuild_swaps_store() {
        let options = BuildOptions::default();
        let reloadable = ReloadableStore::build(&catalog("false"), &options).unwrap();
        let before = reloadable.store();

        reloadable.rebuild(&catalog("true"), &options).unwrap();

        assert_eq!(reloadable.store().authorize("/acme.v1.Svc/Do", &json!({}), &[]), Ok(true));
        // old snapshot keeps its own policies
        assert_eq!(before.authorize("/acme.v1.Svc/Do", &json!({}), &[]), Ok(false));
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_store() {
        let options = BuildOptions::default();
        let reloadable = ReloadableStore::build(&catalog("r.n > 1"), &options).unwrap();

        let err = reloadable.rebuild(&catalog("r.missing"), &options).unwrap_err();
        assert_eq!(err.len(), 1);

        let store = reloadable.store();
        assert_eq!(store.get("/acme.v1.Svc/Do").map(|p| p.predicate()), Some("r.n > 1"));
    }
}
