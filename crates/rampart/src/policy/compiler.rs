//! Parallel policy compiler.
//!
//! Compilation walks every service of a [`DescriptorSource`], keeps the
//! methods that carry predicate text and are not client-streaming, and
//! compiles them on a fixed number of worker threads:
//!
//! ```text
//!   methods ──► [job queue] ──► worker 1 ──┐
//!                          ├──► worker 2 ──┼──► channel ──► policies | errors
//!                          └──► worker N ──┘
//! ```
//!
//! Each job resolves the input schema, parses the predicate as a single
//! expression and type-checks it. No job stops the others: the build returns
//! either every policy or every error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use rhai::{Engine, OptimizationLevel};

use crate::descriptor::{DescriptorSource, method_key};
use crate::error::{BuildError, CompileError, DescriptorError, PolicyError};
use crate::matcher::MatcherConfig;
use crate::policy::checker::{Checker, Type};
use crate::policy::functions;
use crate::policy::schema::InputSchema;
use crate::policy::store::Policy;
use crate::roles::{Role, default_roles, validate_roles};

// =============================================================================
// Options
// =============================================================================

/// Evaluator resource limits applied to every predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum operations per evaluation.
    pub max_operations: u64,

    /// Maximum expression nesting depth.
    pub max_expr_depth: usize,

    /// Maximum length of any string value.
    pub max_string_size: usize,

    /// Maximum length of any list value.
    pub max_array_size: usize,

    /// Maximum number of entries of any map value.
    pub max_map_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            max_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 1_000,
            max_map_size: 1_000,
        }
    }
}

/// Everything fixed at build time.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Role constants visible to predicates.
    pub roles: Vec<Role>,

    /// Matchers used by `hasAny` / `hasAll`.
    pub matchers: Arc<MatcherConfig>,

    /// Compiler worker threads.
    pub workers: usize,

    /// Evaluator resource limits.
    pub limits: Limits,

    /// Idle evaluation contexts kept by the store.
    pub max_idle: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            roles: default_roles(),
            matchers: Arc::new(MatcherConfig::default()),
            workers: num_cpus::get(),
            limits: Limits::default(),
            max_idle: 64,
        }
    }
}

impl BuildOptions {
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    #[must_use]
    pub fn with_matchers(mut self, matchers: MatcherConfig) -> Self {
        self.matchers = Arc::new(matchers);
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Create the sandboxed engine shared by compilation and evaluation.
pub(crate) fn engine(options: &BuildOptions) -> Engine {
    let mut engine = Engine::new();

    // The checker walks the parsed tree as written
    engine.set_optimization_level(OptimizationLevel::None);

    let limits = options.limits;
    engine.set_max_operations(limits.max_operations);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    // Expressions only
    engine.set_allow_if_expression(false);
    engine.set_allow_switch_expression(false);
    engine.set_allow_loop_expressions(false);
    engine.set_allow_statement_expression(false);
    engine.set_allow_anonymous_fn(false);
    engine.set_allow_looping(false);
    engine.set_fail_on_invalid_map_property(true);
    engine.disable_symbol("eval");

    functions::register(&mut engine, Arc::clone(&options.matchers));
    engine
}

// =============================================================================
// Compilation
// =============================================================================

/// Output of a successful build.
pub(crate) struct Compiled {
    pub engine: Engine,
    pub policies: HashMap<String, Policy>,
}

struct Job<'a> {
    key: String,
    input_type: &'a str,
    predicate: &'a str,
}

/// Compile every predicate of `source`.
pub(crate) fn compile<S>(source: &S, options: &BuildOptions) -> Result<Compiled, BuildError>
where
    S: DescriptorSource + ?Sized,
{
    let started = Instant::now();
    let mut errors: Vec<PolicyError> = validate_roles(&options.roles)
        .into_iter()
        .map(PolicyError::from)
        .collect();

    let (jobs, skipped) = collect_jobs(source, &mut errors);
    let engine = engine(options);
    let roles: HashSet<String> = options.roles.iter().map(|r| r.name.clone()).collect();

    let workers = options.workers.max(1).min(jobs.len().max(1));
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<Result<Policy, PolicyError>>();

    let mut policies = HashMap::with_capacity(jobs.len());
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (jobs, next, engine, roles) = (&jobs, &next, &engine, &roles);
            let limits = options.limits;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };
                    if tx.send(compile_one(source, engine, roles, limits, job)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for result in rx {
            match result {
                Ok(policy) => {
                    policies.insert(policy.method_key().to_string(), policy);
                }
                Err(error) => errors.push(error),
            }
        }
    });

    if !errors.is_empty() {
        tracing::info!(
            methods = jobs.len(),
            errors = errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "policy build failed"
        );
        return Err(BuildError::new(errors));
    }

    tracing::info!(
        compiled = policies.len(),
        skipped,
        workers,
        duration_ms = started.elapsed().as_millis() as u64,
        "policy store built"
    );

    Ok(Compiled { engine, policies })
}

/// Methods to compile, in declaration order. Duplicate keys are reported
/// once per extra declaration.
fn collect_jobs<'a, S>(source: &'a S, errors: &mut Vec<PolicyError>) -> (Vec<Job<'a>>, usize)
where
    S: DescriptorSource + ?Sized,
{
    let mut jobs = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0;

    for service in source.services() {
        for method in &service.methods {
            let key = method_key(&service.name, &method.name);
            if !seen.insert(key.clone()) {
                errors.push(DescriptorError::DuplicateMethod { method: key }.into());
                continue;
            }

            let predicate = match method.predicate() {
                Some(predicate) if !method.client_streaming => predicate,
                _ => {
                    tracing::trace!(method = %key, "no policy");
                    skipped += 1;
                    continue;
                }
            };

            jobs.push(Job {
                key,
                input_type: &method.input_type,
                predicate,
            });
        }
    }

    (jobs, skipped)
}

fn compile_one<S>(
    source: &S,
    engine: &Engine,
    roles: &HashSet<String>,
    limits: Limits,
    job: &Job<'_>,
) -> Result<Policy, PolicyError>
where
    S: DescriptorSource + ?Sized,
{
    let input = InputSchema::resolve(source, &job.key, job.input_type)?;

    let program = engine
        .compile_expression(job.predicate)
        .map_err(|e| CompileError::Parse {
            method: job.key.clone(),
            message: e.to_string(),
        })?;

    let checker = Checker::new(&input, roles);
    let found = checker.check(&program).map_err(|message| CompileError::Check {
        method: job.key.clone(),
        message,
    })?;
    let read_depth = checker.read_depth();

    if found != Type::Bool {
        return Err(CompileError::NotBoolean {
            method: job.key.clone(),
            found: found.to_string(),
        }
        .into());
    }

    tracing::debug!(method = %job.key, input = job.input_type, "compiled policy");
    let input = input.with_read_depth(read_depth).with_limits(limits);
    Ok(Policy::new(job.key.clone(), job.predicate.to_string(), program, input))
}
