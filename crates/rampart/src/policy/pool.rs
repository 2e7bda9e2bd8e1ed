//! Pool of reusable evaluation contexts.
//!
//! Building a scope means re-declaring every role constant, so scopes are kept
//! and reused across evaluations instead of being rebuilt per request.
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ ContextPool (owned by a PolicyStore)            │
//! │   ├── idle: Mutex<Vec<EvaluationContext>>       │
//! │   ├── roles: Arc<[Role]>                        │
//! │   └── max_idle                                  │
//! └─────────────────────────────────────────────────┘
//!              │
//!              ▼ checkout()
//! ┌─────────────────────────────────────────────────┐
//! │ Per evaluation:                                 │
//! │   1. Pop an idle context (or create one)        │
//! │   2. Bind `r` and `u` above the role constants  │
//! │   3. Evaluate                                   │
//! │   4. On drop: rewind to the constants, return   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! A context never carries bindings from one evaluation into the next, and
//! at most one evaluation uses a context at a time.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rhai::{Dynamic, INT, Scope};

use crate::permission::PermissionSet;
use crate::roles::{PERMISSIONS_VAR, REQUEST_VAR, Role};

// =============================================================================
// Evaluation Context
// =============================================================================

/// A scope pre-populated with the role constants.
pub struct EvaluationContext {
    scope: Scope<'static>,
    constants: usize,
}

impl EvaluationContext {
    fn new(roles: &[Role]) -> Self {
        let mut scope = Scope::with_capacity(roles.len() + 2);
        for role in roles {
            scope.push_constant(role.name.as_str(), role.value as INT);
        }
        let constants = scope.len();
        Self { scope, constants }
    }

    /// Bind the request and the caller's permissions for one evaluation.
    pub fn bind(&mut self, request: Dynamic, permissions: PermissionSet) {
        self.reset();
        self.scope.push_dynamic(REQUEST_VAR, request);
        self.scope.push(PERMISSIONS_VAR, permissions);
    }

    /// Scope to evaluate against.
    pub fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    fn reset(&mut self) {
        self.scope.rewind(self.constants);
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Bounded pool of [`EvaluationContext`]s.
pub struct ContextPool {
    idle: Mutex<Vec<EvaluationContext>>,
    roles: Arc<[Role]>,
    max_idle: usize,
    created: AtomicUsize,
    checkouts: AtomicUsize,
}

impl ContextPool {
    #[must_use]
    pub fn new(roles: Arc<[Role]>, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            roles,
            max_idle,
            created: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
        }
    }

    /// Take a context for exclusive use. It returns to the pool on drop.
    pub fn checkout(&self) -> PooledContext<'_> {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        let context = self.lock().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            EvaluationContext::new(&self.roles)
        });

        PooledContext {
            pool: self,
            context: Some(context),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.lock().len(),
            max_idle: self.max_idle,
            created: self.created.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
        }
    }

    fn release(&self, mut context: EvaluationContext) {
        context.reset();
        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push(context);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EvaluationContext>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("evaluation context pool mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// A checked-out context.
pub struct PooledContext<'a> {
    pool: &'a ContextPool,
    context: Option<EvaluationContext>,
}

impl Deref for PooledContext<'_> {
    type Target = EvaluationContext;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the context out.
        self.context.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.release(context);
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics about a context pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Contexts currently waiting for reuse.
    pub idle: usize,

    /// Upper bound on idle contexts.
    pub max_idle: usize,

    /// Contexts created since the pool was built.
    pub created: usize,

    /// Total number of checkouts.
    pub checkouts: usize,
}
