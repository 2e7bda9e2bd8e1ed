//! Transport-neutral call guard.
//!
//! The guard is what an RPC interceptor calls before dispatching a unary
//! call: it looks up the method's policy, fetches the caller's permissions
//! only when a policy exists, and turns the outcome into a [`Verdict`].
//!
//! ```ignore
//! let guard = Guard::new(store);
//! match guard.check("/acme.library.v1.Library/CreateBook", &request, || load_permissions(&token))? {
//!     Verdict::Allowed => dispatch(request),
//!     Verdict::Denied => Err(Status::permission_denied("")),
//!     Verdict::Fault(_) => Err(Status::internal("")),
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::error::EvalFault;
use crate::permission::{Permission, PermissionSet};
use crate::reload::ReloadableStore;

/// Guard behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct GuardOptions {
    /// Allow every call without evaluating anything.
    pub skip: bool,
}

/// Outcome of a guarded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The call may proceed.
    Allowed,
    /// The predicate evaluated to `false`.
    Denied,
    /// The predicate could not be evaluated; the call must be rejected.
    Fault(EvalFault),
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Authorizes calls against the current store of a [`ReloadableStore`].
#[derive(Debug, Clone)]
pub struct Guard {
    store: ReloadableStore,
    options: Arc<GuardOptions>,
}

impl Guard {
    #[must_use]
    pub fn new(store: ReloadableStore) -> Self {
        Self::with_options(store, GuardOptions::default())
    }

    #[must_use]
    pub fn with_options(store: ReloadableStore, options: GuardOptions) -> Self {
        Self {
            store,
            options: Arc::new(options),
        }
    }

    /// Decide a call to `method`.
    ///
    /// `permissions` is invoked only when the method has a policy; its error
    /// is returned unchanged.
    pub fn check<R, F, E>(&self, method: &str, request: &R, permissions: F) -> Result<Verdict, E>
    where
        R: Serialize + ?Sized,
        F: FnOnce() -> Result<Vec<Permission>, E>,
    {
        if self.options.skip {
            return Ok(Verdict::Allowed);
        }

        let store = self.store.store();
        if !store.contains(method) {
            return Ok(Verdict::Allowed);
        }

        let permissions = PermissionSet::from(permissions()?);
        let verdict = match store.authorize_with(method, request, &permissions) {
            Ok(true) => Verdict::Allowed,
            Ok(false) => {
                tracing::debug!(method, "permission denied");
                Verdict::Denied
            }
            Err(fault) => {
                tracing::error!(method, error = %fault, "policy evaluation failed");
                Verdict::Fault(fault)
            }
        };

        Ok(verdict)
    }

    /// The store this guard evaluates against.
    #[must_use]
    pub fn store(&self) -> &ReloadableStore {
        &self.store
    }
}
