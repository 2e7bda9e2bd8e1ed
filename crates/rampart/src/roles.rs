//! Role registry: named privilege levels usable as constants in predicates.
//!
//! With the default ordered level matcher a smaller value is a more privileged
//! role, so `OWNER` (1) satisfies a predicate requiring `VIEWER` (15).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

pub const OWNER: i64 = 1;
pub const MANAGER: i64 = 5;
pub const EDITOR: i64 = 10;
pub const VIEWER: i64 = 15;

/// Name of the request variable inside predicates.
pub const REQUEST_VAR: &str = "r";

/// Name of the permission-list variable inside predicates.
pub const PERMISSIONS_VAR: &str = "u";

pub const HAS_ANY: &str = "hasAny";
pub const HAS_ALL: &str = "hasAll";

const RESERVED_NAMES: [&str; 4] = [REQUEST_VAR, PERMISSIONS_VAR, HAS_ANY, HAS_ALL];

/// A named privilege level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub value: i64,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// The built-in role table: `OWNER`, `MANAGER`, `EDITOR`, `VIEWER`.
#[must_use]
pub fn default_roles() -> Vec<Role> {
    vec![
        Role::new("OWNER", OWNER),
        Role::new("MANAGER", MANAGER),
        Role::new("EDITOR", EDITOR),
        Role::new("VIEWER", VIEWER),
    ]
}

/// Check a role table, returning every problem found.
///
/// Names must be identifiers of the expression language, must not be keywords,
/// must not shadow the request/permission variables or the aggregate
/// functions, and must be unique.
#[must_use]
pub fn validate_roles(roles: &[Role]) -> Vec<DeclarationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::with_capacity(roles.len());

    for role in roles {
        let name = role.name.as_str();
        if !rhai::is_valid_identifier(name) {
            errors.push(DeclarationError::InvalidName {
                name: name.to_string(),
            });
        } else if !rhai::is_valid_function_name(name) || RESERVED_NAMES.contains(&name) {
            errors.push(DeclarationError::Reserved {
                name: name.to_string(),
            });
        } else if !seen.insert(name) {
            errors.push(DeclarationError::Duplicate {
                name: name.to_string(),
            });
        }
    }

    errors
}
