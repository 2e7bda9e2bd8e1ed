//! Immutable store of compiled policies and the runtime evaluator.

use std::collections::HashMap;
use std::sync::Arc;

use rhai::{AST, Dynamic, Engine, EvalAltResult};
use serde::Serialize;

use crate::descriptor::DescriptorSource;
use crate::error::{BuildError, EvalFault, MatchError};
use crate::matcher::MatcherConfig;
use crate::permission::{Permission, PermissionSet};
use crate::policy::compiler::{self, BuildOptions};
use crate::policy::pool::{ContextPool, PoolStats};
use crate::policy::schema::InputSchema;

/// A checked predicate bound to one method.
#[derive(Debug, Clone)]
pub struct Policy {
    method_key: String,
    predicate: String,
    program: AST,
    input: InputSchema,
}

impl Policy {
    pub(crate) fn new(method_key: String, predicate: String, program: AST, input: InputSchema) -> Self {
        Self {
            method_key,
            predicate,
            program,
            input,
        }
    }

    #[must_use]
    pub fn method_key(&self) -> &str {
        &self.method_key
    }

    /// Predicate source text.
    #[must_use]
    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    /// Fully-qualified name of the request message.
    #[must_use]
    pub fn input_type(&self) -> &str {
        self.input.root()
    }
}

// =============================================================================
// Policy Store
// =============================================================================

/// Method key to compiled policy, plus everything needed to evaluate.
///
/// A store is never modified after [`PolicyStore::build`]; rebuilding
/// produces a new store (see [`ReloadableStore`](crate::ReloadableStore)).
/// `authorize` may be called from any number of threads.
pub struct PolicyStore {
    policies: HashMap<String, Policy>,
    engine: Engine,
    pool: ContextPool,
    matchers: Arc<MatcherConfig>,
}

impl PolicyStore {
    /// Compile every predicate in `source`.
    ///
    /// # Errors
    ///
    /// Returns every descriptor, declaration and compile error found; no
    /// partial store is ever produced.
    pub fn build<S>(source: &S, options: &BuildOptions) -> Result<Self, BuildError>
    where
        S: DescriptorSource + ?Sized,
    {
        let compiled = compiler::compile(source, options)?;
        Ok(Self {
            policies: compiled.policies,
            engine: compiled.engine,
            pool: ContextPool::new(options.roles.clone().into(), options.max_idle),
            matchers: Arc::clone(&options.matchers),
        })
    }

    /// Decide whether a call to `method` is allowed.
    ///
    /// Methods without a policy are allowed. A predicate evaluating to
    /// `false` yields `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalFault`] when the request does not fit the method's
    /// input schema or the predicate fails to produce a boolean.
    pub fn authorize<R>(&self, method: &str, request: &R, permissions: &[Permission]) -> Result<bool, EvalFault>
    where
        R: Serialize + ?Sized,
    {
        if !self.policies.contains_key(method) {
            return Ok(true);
        }
        self.authorize_with(method, request, &PermissionSet::new(permissions))
    }

    /// [`authorize`](Self::authorize) with a caller-owned permission set,
    /// shared with the evaluator instead of copied.
    ///
    /// # Errors
    ///
    /// Same as [`authorize`](Self::authorize).
    pub fn authorize_with<R>(&self, method: &str, request: &R, permissions: &PermissionSet) -> Result<bool, EvalFault>
    where
        R: Serialize + ?Sized,
    {
        let Some(policy) = self.policies.get(method) else {
            return Ok(true);
        };

        let json = serde_json::to_value(request)
            .map_err(|e| EvalFault::binding(method, policy.input_type(), e.to_string()))?;
        let bound = policy.input.bind(method, &json)?;

        let mut context = self.pool.checkout();
        context.bind(bound, permissions.clone());

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(context.scope_mut(), &policy.program)
            .map_err(|e| classify(method, *e))?;

        result.as_bool().map_err(|type_name| EvalFault::NonBoolean {
            method: method.to_string(),
            type_name: type_name.to_string(),
        })
    }

    #[must_use]
    pub fn get(&self, method: &str) -> Option<&Policy> {
        self.policies.get(method)
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.policies.contains_key(method)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Method keys with a policy, sorted.
    #[must_use]
    pub fn method_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    /// Matchers the store's `hasAny` / `hasAll` are bound to.
    #[must_use]
    pub fn matchers(&self) -> &MatcherConfig {
        &self.matchers
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("policies", &self.method_keys())
            .field("matchers", &self.matchers)
            .finish_non_exhaustive()
    }
}

/// Map an evaluator error onto the fault taxonomy.
fn classify(method: &str, error: EvalAltResult) -> EvalFault {
    match error {
        EvalAltResult::ErrorFunctionNotFound(signature, _) => EvalFault::NoOverload {
            method: method.to_string(),
            message: signature,
        },
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify(method, *inner),
        EvalAltResult::ErrorRuntime(value, pos) => match value.try_cast_result::<MatchError>() {
            Ok(source) => EvalFault::Matcher {
                method: method.to_string(),
                source,
            },
            Err(value) => EvalFault::Execution {
                method: method.to_string(),
                message: EvalAltResult::ErrorRuntime(value, pos).to_string(),
            },
        },
        other => EvalFault::Execution {
            method: method.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Catalog, FieldType, MessageSchema, MethodDescriptor, ServiceDescriptor};
    use crate::matcher::{LevelMatch, ResourceMatch};
    use crate::policy::compiler::Limits;
    use serde_json::json;

    fn catalog(predicate: &str) -> Catalog {
        Catalog::new()
            .with_service(
                ServiceDescriptor::new("acme.v1.Svc")
                    .with_method(MethodDescriptor::new("Do", "acme.v1.Req").with_predicate(predicate))
                    .with_method(MethodDescriptor::new("Open", "acme.v1.Req")),
            )
            .with_message(
                MessageSchema::new("acme.v1.Req")
                    .with_field("parent", FieldType::String)
                    .with_field("ids", FieldType::List(Box::new(FieldType::Int))),
            )
    }

    fn store(predicate: &str) -> PolicyStore {
        PolicyStore::build(&catalog(predicate), &BuildOptions::default()).unwrap()
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    #[test]
    fn test_true_false_and_undeclared() {
        let allow = store("true");
        let deny = store("false");

        assert_eq!(allow.authorize("/acme.v1.Svc/Do", &json!({}), &[]), Ok(true));
        assert_eq!(deny.authorize("/acme.v1.Svc/Do", &json!({}), &[]), Ok(false));
        assert_eq!(deny.authorize("/acme.v1.Svc/Open", &json!({}), &[]), Ok(true));
        assert_eq!(deny.authorize("/nothing/Here", &json!({}), &[]), Ok(true));
    }

    #[test]
    fn test_request_and_permissions_are_bound() {
        let store = store(r#"hasAny(u, EDITOR, [r.parent + "/books"])"#);
        let permissions = [Permission::new(5, ["/shelves/1/*"])];

        let allowed = store.authorize("/acme.v1.Svc/Do", &json!({"parent": "/shelves/1"}), &permissions);
        let denied = store.authorize("/acme.v1.Svc/Do", &json!({"parent": "/shelves/2"}), &permissions);
        assert_eq!(allowed, Ok(true));
        assert_eq!(denied, Ok(false));
    }

    #[test]
    fn test_authorize_with_shared_permission_set() {
        let store = store(r#"hasAny(u, EDITOR, [r.parent + "/books"])"#);
        let permissions = PermissionSet::from(vec![Permission::new(5, ["/shelves/1/*"])]);

        for _ in 0..3 {
            let allowed = store.authorize_with("/acme.v1.Svc/Do", &json!({"parent": "/shelves/1"}), &permissions);
            assert_eq!(allowed, Ok(true));
        }
        let denied = store.authorize_with("/acme.v1.Svc/Do", &json!({"parent": "/shelves/2"}), &permissions);
        assert_eq!(denied, Ok(false));
        assert_eq!(store.authorize_with("/acme.v1.Svc/Open", &json!({}), &PermissionSet::default()), Ok(true));
    }

    // -------------------------------------------------------------------------
    // Recursive messages
    // -------------------------------------------------------------------------

    fn tree_catalog(predicate: &str) -> Catalog {
        Catalog::new()
            .with_service(
                ServiceDescriptor::new("acme.v1.Tree")
                    .with_method(MethodDescriptor::new("Walk", "acme.v1.WalkRequest").with_predicate(predicate)),
            )
            .with_message(
                MessageSchema::new("acme.v1.WalkRequest")
                    .with_field("parent", FieldType::String)
                    .with_field("node", FieldType::Message("acme.v1.Node".to_string())),
            )
            .with_message(
                MessageSchema::new("acme.v1.Node")
                    .with_field("name", FieldType::String)
                    .with_field("child", FieldType::Message("acme.v1.Node".to_string())),
            )
    }

    fn walk(predicate: &str, request: serde_json::Value) -> Result<bool, EvalFault> {
        let store = PolicyStore::build(&tree_catalog(predicate), &BuildOptions::default()).unwrap();
        store.authorize("/acme.v1.Tree/Walk", &request, &[])
    }

    #[test]
    fn test_absent_recursive_message_reads_zero_values() {
        assert_eq!(walk(r#"r.node.child.name == """#, json!({"parent": "a"})), Ok(true));
        assert_eq!(
            walk(r#"r.node.child.child.child.name == """#, json!({"parent": "a"})),
            Ok(true)
        );
    }

    #[test]
    fn test_recursive_zero_fill_below_supplied_messages() {
        let request = json!({"node": {"child": {"name": "y"}}});
        assert_eq!(walk(r#"r.node.child.name == "y""#, request.clone()), Ok(true));
        assert_eq!(walk(r#"r.node.child.child.name == """#, request.clone()), Ok(true));
        assert_eq!(walk(r#"r.node.child.child.child.child.name == """#, request), Ok(true));
    }

    // -------------------------------------------------------------------------
    // Faults
    // -------------------------------------------------------------------------

    #[test]
    fn test_binding_fault() {
        let store = store("r.parent == \"\"");
        let fault = store
            .authorize("/acme.v1.Svc/Do", &json!({"parent": 1}), &[])
            .unwrap_err();
        assert!(matches!(fault, EvalFault::Binding { .. }));
    }

    #[test]
    fn test_matcher_fault() {
        let options = BuildOptions::default()
            .with_matchers(MatcherConfig::new(ResourceMatch::regex(), LevelMatch::default()));
        let store = PolicyStore::build(&catalog("hasAll(u, OWNER, [r.parent])"), &options).unwrap();

        let fault = store
            .authorize("/acme.v1.Svc/Do", &json!({"parent": "/a"}), &[Permission::new(1, ["(unclosed"])])
            .unwrap_err();
        assert!(matches!(fault, EvalFault::Matcher { source: MatchError::InvalidRegex { .. }, .. }));
    }

    #[test]
    fn test_bound_data_over_size_limits_is_binding_fault() {
        let limits = Limits {
            max_string_size: 8,
            max_array_size: 2,
            ..Limits::default()
        };
        let options = BuildOptions::default().with_limits(limits);
        let compare = PolicyStore::build(&catalog("r.parent == \"x\""), &options).unwrap();
        let call = PolicyStore::build(&catalog("r.parent.starts_with(\"/a\")"), &options).unwrap();
        let long = json!({"parent": "/a/0123456789"});

        for store in [&compare, &call] {
            let fault = store.authorize("/acme.v1.Svc/Do", &long, &[]).unwrap_err();
            let EvalFault::Binding { message, .. } = &fault else {
                panic!("expected binding fault, got {fault}");
            };
            assert!(message.contains("exceeds max_string_size (8)"), "{message}");
        }

        let fault = compare
            .authorize("/acme.v1.Svc/Do", &json!({"ids": [1, 2, 3]}), &[])
            .unwrap_err();
        assert!(matches!(fault, EvalFault::Binding { .. }));
        assert_eq!(compare.authorize("/acme.v1.Svc/Do", &json!({"parent": "/a/0123"}), &[]), Ok(false));
    }

    #[test]
    fn test_index_out_of_bounds_is_execution_fault() {
        let store = store("r.ids[3] == 1");
        let fault = store
            .authorize("/acme.v1.Svc/Do", &json!({"ids": [1]}), &[])
            .unwrap_err();
        assert!(matches!(fault, EvalFault::Execution { .. }));
    }

    #[test]
    fn test_operation_limit_is_execution_fault() {
        let limits = Limits {
            max_operations: 3,
            ..Limits::default()
        };
        let options = BuildOptions::default().with_limits(limits);
        let store = PolicyStore::build(&catalog("r.ids.len() > 1 && r.ids.len() > 2 && r.ids.len() > 3"), &options)
            .unwrap();

        let fault = store
            .authorize("/acme.v1.Svc/Do", &json!({"ids": [1, 2, 3, 4]}), &[])
            .unwrap_err();
        assert!(matches!(fault, EvalFault::Execution { .. }));
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    #[test]
    fn test_introspection() {
        let store = store("true");
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert!(store.contains("/acme.v1.Svc/Do"));
        assert_eq!(store.method_keys(), vec!["/acme.v1.Svc/Do"]);

        let policy = store.get("/acme.v1.Svc/Do").unwrap();
        assert_eq!(policy.predicate(), "true");
        assert_eq!(policy.input_type(), "acme.v1.Req");
        assert_eq!(store.iter().count(), 1);
    }

    #[test]
    fn test_contexts_return_to_pool_after_fault() {
        let store = store("r.ids[3] == 1");
        for _ in 0..3 {
            let _ = store.authorize("/acme.v1.Svc/Do", &json!({"ids": []}), &[]);
        }
        let stats = store.pool_stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);
    }
}
