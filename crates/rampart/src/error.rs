//! Error types for building and evaluating policies.
//!
//! Build-time failures come in three families ([`DescriptorError`],
//! [`DeclarationError`] and [`CompileError`]) which are collected into a single
//! [`BuildError`]. Request-time failures are reported as [`EvalFault`], which is
//! always distinct from a policy returning `false`.

use std::fmt;

/// A method's request schema could not be resolved from the descriptor source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// The input message, or a message it references, is unknown.
    #[error("{method}: unable to resolve message type '{type_name}'")]
    UnresolvedType {
        /// Method key that needed the type.
        method: String,
        /// Fully-qualified name of the missing message.
        type_name: String,
    },

    /// Two methods produced the same method key.
    #[error("{method}: method is declared more than once")]
    DuplicateMethod {
        /// The duplicated method key.
        method: String,
    },
}

/// A role declaration is unusable inside predicate text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    /// The role name is not an identifier of the expression language.
    #[error("role '{name}' is not a valid identifier")]
    InvalidName {
        /// Offending role name.
        name: String,
    },

    /// The role name is a keyword or shadows a built-in binding.
    #[error("role '{name}' uses a reserved name")]
    Reserved {
        /// Offending role name.
        name: String,
    },

    /// The role name appears more than once in the role table.
    #[error("role '{name}' is declared more than once")]
    Duplicate {
        /// Offending role name.
        name: String,
    },
}

/// A predicate failed to parse or type-check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The predicate text is not a well-formed expression.
    #[error("{method}: unable to parse predicate: {message}")]
    Parse {
        /// Method key owning the predicate.
        method: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The predicate references unknown names or applies operations to the wrong types.
    #[error("{method}: {message}")]
    Check {
        /// Method key owning the predicate.
        method: String,
        /// Type-checker diagnostic.
        message: String,
    },

    /// The predicate type-checks but does not produce a boolean.
    #[error("{method}: predicate is not a bool, got: {found}")]
    NotBoolean {
        /// Method key owning the predicate.
        method: String,
        /// The inferred result type.
        found: String,
    },
}

impl CompileError {
    /// Method key the error belongs to.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Parse { method, .. } | Self::Check { method, .. } | Self::NotBoolean { method, .. } => {
                method
            }
        }
    }
}

/// Any single failure collected while building a policy store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Aggregate of every error found while building a policy store.
///
/// A build never stops at the first failure: all methods are compiled and all
/// diagnostics are reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    errors: Vec<PolicyError>,
}

impl BuildError {
    #[must_use]
    pub fn new(errors: Vec<PolicyError>) -> Self {
        Self { errors }
    }

    /// Every collected error, in no particular order across methods.
    #[must_use]
    pub fn errors(&self) -> &[PolicyError] {
        &self.errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<PolicyError> {
        self.errors
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy build failed with {} error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}

/// A resource pattern could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// The pattern is not a valid regular expression.
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex {
        /// The rejected pattern.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// The pattern is not a valid glob.
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidGlob {
        /// The rejected pattern.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },
}

/// Evaluation of a compiled predicate failed.
///
/// A fault is never a decision: callers should reject the request and treat the
/// fault as an operator-actionable anomaly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalFault {
    /// The request could not be bound to the method's input schema.
    #[error("{method}: request does not match '{type_name}': {message}")]
    Binding {
        /// Method key being evaluated.
        method: String,
        /// Input message name.
        type_name: String,
        /// What did not fit.
        message: String,
    },

    /// A function was called with arguments it has no overload for.
    #[error("{method}: no applicable overload: {message}")]
    NoOverload {
        /// Method key being evaluated.
        method: String,
        /// Evaluator diagnostic.
        message: String,
    },

    /// A permission pattern could not be compiled by the resource matcher.
    #[error("{method}: {source}")]
    Matcher {
        /// Method key being evaluated.
        method: String,
        /// The pattern failure.
        source: MatchError,
    },

    /// The predicate produced something other than a boolean.
    #[error("{method}: predicate evaluated to {type_name}, expected bool")]
    NonBoolean {
        /// Method key being evaluated.
        method: String,
        /// Type name of the produced value.
        type_name: String,
    },

    /// Any other evaluator failure, including exceeded resource limits.
    #[error("{method}: evaluation failed: {message}")]
    Execution {
        /// Method key being evaluated.
        method: String,
        /// Evaluator diagnostic.
        message: String,
    },
}

impl EvalFault {
    #[must_use]
    pub fn binding(method: &str, type_name: &str, message: impl Into<String>) -> Self {
        Self::Binding {
            method: method.to_string(),
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }

    /// Method key the fault was raised for.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Binding { method, .. }
            | Self::NoOverload { method, .. }
            | Self::Matcher { method, .. }
            | Self::NonBoolean { method, .. }
            | Self::Execution { method, .. } => method,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_lists_every_error() {
        let error = BuildError::new(vec![
            DeclarationError::Duplicate {
                name: "OWNER".to_string(),
            }
            .into(),
            CompileError::NotBoolean {
                method: "/acme.v1.Svc/Get".to_string(),
                found: "int".to_string(),
            }
            .into(),
        ]);

        let text = error.to_string();
        assert!(text.starts_with("policy build failed with 2 error(s)"));
        assert!(text.contains("role 'OWNER' is declared more than once"));
        assert!(text.contains("/acme.v1.Svc/Get: predicate is not a bool, got: int"));
        assert_eq!(error.len(), 2);
    }

    #[test]
    fn test_eval_fault_method() {
        let fault = EvalFault::Matcher {
            method: "/acme.v1.Svc/Get".to_string(),
            source: MatchError::InvalidRegex {
                pattern: "(".to_string(),
                message: "unclosed group".to_string(),
            },
        };
        assert_eq!(fault.method(), "/acme.v1.Svc/Get");
        assert!(fault.to_string().contains("invalid regex pattern '('"));
    }
}
