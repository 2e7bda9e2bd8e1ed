//! `hasAny` / `hasAll` and the permission types exposed to predicates.
//!
//! Both functions accept the permission list, a required level and a list of
//! requested resources, and are callable either as `hasAny(u, OWNER, [..])` or
//! method-style as `u.hasAny(OWNER, [..])`.
//!
//! A pattern that fails to compile aborts evaluation with the underlying
//! [`MatchError`] carried in the runtime error value, so the evaluator can
//! report it as a matcher fault instead of a denial.

use std::sync::Arc;

use rhai::{Array, Dynamic, Engine, EvalAltResult, INT, ImmutableString, Position};

use crate::error::MatchError;
use crate::matcher::{LevelMatcher, MatcherConfig, ResourceMatcher};
use crate::permission::{Permission, PermissionSet};
use crate::roles::{HAS_ALL, HAS_ANY};

pub(crate) const PERMISSION_SET_TYPE: &str = "PermissionSet";
pub(crate) const PERMISSION_TYPE: &str = "Permission";

/// True iff some level-matching permission has a pattern matching some
/// requested resource.
///
/// Scans permissions in order, then their patterns, then the requested
/// resources, and stops at the first match.
pub fn has_any(
    matchers: &MatcherConfig,
    permissions: &[Permission],
    level: i64,
    resources: &[&str],
) -> Result<bool, MatchError> {
    for permission in permissions {
        if !matchers.level.match_level(permission.level, level) {
            continue;
        }
        for pattern in &permission.resources {
            for resource in resources {
                if matchers.resource.match_resource(pattern, resource)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// True iff every requested resource is matched by some level-matching
/// permission. Vacuously true when nothing is requested.
pub fn has_all(
    matchers: &MatcherConfig,
    permissions: &[Permission],
    level: i64,
    resources: &[&str],
) -> Result<bool, MatchError> {
    for resource in resources {
        let mut found = false;
        'permissions: for permission in permissions {
            if !matchers.level.match_level(permission.level, level) {
                continue;
            }
            for pattern in &permission.resources {
                if matchers.resource.match_resource(pattern, resource)? {
                    found = true;
                    break 'permissions;
                }
            }
        }
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

// =============================================================================
// Engine registration
// =============================================================================

/// Register the permission types and the aggregate functions bound to `matchers`.
pub(crate) fn register(engine: &mut Engine, matchers: Arc<MatcherConfig>) {
    engine
        .register_type_with_name::<PermissionSet>(PERMISSION_SET_TYPE)
        .register_fn("len", |set: &mut PermissionSet| set.len() as INT)
        .register_get("len", |set: &mut PermissionSet| set.len() as INT)
        .register_fn("is_empty", |set: &mut PermissionSet| set.is_empty())
        .register_get("is_empty", |set: &mut PermissionSet| set.is_empty())
        .register_indexer_get(
            |set: &mut PermissionSet, index: INT| -> Result<Permission, Box<EvalAltResult>> {
                usize::try_from(index)
                    .ok()
                    .and_then(|i| set.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        EvalAltResult::ErrorArrayBounds(set.len(), index, Position::NONE).into()
                    })
            },
        );

    engine
        .register_type_with_name::<Permission>(PERMISSION_TYPE)
        .register_get("level", |p: &mut Permission| p.level as INT)
        .register_get("resources", |p: &mut Permission| -> Array {
            p.resources.iter().map(|r| Dynamic::from(r.clone())).collect()
        });

    let any = Arc::clone(&matchers);
    engine.register_fn(
        HAS_ANY,
        move |set: &mut PermissionSet, level: INT, resources: Array| -> Result<bool, Box<EvalAltResult>> {
            let resources = resource_strings(HAS_ANY, &resources)?;
            let refs: Vec<&str> = resources.iter().map(ImmutableString::as_str).collect();
            has_any(&any, set.as_slice(), level, &refs).map_err(match_fault)
        },
    );

    let all = matchers;
    engine.register_fn(
        HAS_ALL,
        move |set: &mut PermissionSet, level: INT, resources: Array| -> Result<bool, Box<EvalAltResult>> {
            let resources = resource_strings(HAS_ALL, &resources)?;
            let refs: Vec<&str> = resources.iter().map(ImmutableString::as_str).collect();
            has_all(&all, set.as_slice(), level, &refs).map_err(match_fault)
        },
    );
}

/// Every element of the requested-resource list must be a string.
fn resource_strings(function: &str, resources: &Array) -> Result<Vec<ImmutableString>, Box<EvalAltResult>> {
    resources
        .iter()
        .enumerate()
        .map(|(index, value)| {
            value.as_immutable_string_ref().map(|s| (*s).clone()).map_err(|type_name| {
                EvalAltResult::ErrorFunctionNotFound(
                    format!("{function} (resource {index} is {type_name}, expected string)"),
                    Position::NONE,
                )
                .into()
            })
        })
        .collect()
}

fn match_fault(error: MatchError) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(error), Position::NONE).into()
}
