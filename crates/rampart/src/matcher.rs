//! Resource and level matching strategies.
//!
//! Both families are closed sets of variants behind a small capability trait,
//! chosen once when a store is built and shared read-only by every compiled
//! policy afterwards.
//!
//! # Resource matchers
//!
//! | Variant  | Semantics                                        |
//! |----------|--------------------------------------------------|
//! | `Exact`  | `pattern == resource`                            |
//! | `Prefix` | `resource` starts with `pattern`                 |
//! | `Regex`  | unanchored regular-expression search             |
//! | `Glob`   | shell glob (`*`, `?`, `[..]`, `{a,b}`, `**`)     |
//!
//! Regex and glob patterns are compiled lazily on first use and cached by
//! pattern text. Invalid patterns are reported as [`MatchError`] and are never
//! cached.
//!
//! # Level matchers
//!
//! | Variant   | Authorized when                                  |
//! |-----------|--------------------------------------------------|
//! | `Exact`   | `owned == required`                              |
//! | `Ordered` | `owned <= required` (or `>=` when ascending)     |
//! | `BitMask` | `owned & required == required`                   |

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::error::MatchError;

/// Compares a permission's resource pattern against a requested resource.
pub trait ResourceMatcher: Send + Sync {
    fn match_resource(&self, pattern: &str, resource: &str) -> Result<bool, MatchError>;
}

/// Compares an owned privilege level against a required one.
pub trait LevelMatcher: Send + Sync {
    fn match_level(&self, owned: i64, required: i64) -> bool;
}

// =============================================================================
// Resource matching
// =============================================================================

/// Resource matching strategy.
pub enum ResourceMatch {
    Exact,
    Prefix,
    Regex(RegexCache),
    Glob(GlobCache),
}

impl ResourceMatch {
    #[must_use]
    pub fn regex() -> Self {
        Self::Regex(RegexCache::default())
    }

    /// Glob matching where `*` and `?` also match `/`.
    #[must_use]
    pub fn glob() -> Self {
        Self::Glob(GlobCache::new(false))
    }

    /// Glob matching where only `**` crosses `/` separators.
    #[must_use]
    pub fn glob_with_literal_separator() -> Self {
        Self::Glob(GlobCache::new(true))
    }

    /// Short name used in configuration and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Regex(_) => "regex",
            Self::Glob(_) => "glob",
        }
    }
}

impl Default for ResourceMatch {
    fn default() -> Self {
        Self::glob()
    }
}

impl fmt::Debug for ResourceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob(cache) => f
                .debug_struct("Glob")
                .field("literal_separator", &cache.literal_separator)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl ResourceMatcher for ResourceMatch {
    fn match_resource(&self, pattern: &str, resource: &str) -> Result<bool, MatchError> {
        match self {
            Self::Exact => Ok(pattern == resource),
            Self::Prefix => Ok(resource.starts_with(pattern)),
            Self::Regex(cache) => Ok(cache.get_or_compile(pattern)?.is_match(resource)),
            Self::Glob(cache) => Ok(cache.get_or_compile(pattern)?.is_match(resource)),
        }
    }
}

/// Grow-only cache of compiled regular expressions keyed by pattern text.
///
/// Two threads missing the cache for the same pattern may both compile it; the
/// results are equivalent and whichever insert lands last wins.
#[derive(Debug, Default)]
pub struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    /// Get a compiled regex from cache or compile and cache it.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Regex, MatchError> {
        // Check cache first (read lock)
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(re) = cache.get(pattern) {
                return Ok(re.clone());
            }
        }

        let re = Regex::new(pattern).map_err(|e| MatchError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(pattern.to_string(), re.clone());

        Ok(re)
    }

    /// Number of cached patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Grow-only cache of compiled glob matchers keyed by pattern text.
#[derive(Debug)]
pub struct GlobCache {
    literal_separator: bool,
    cache: RwLock<HashMap<String, GlobMatcher>>,
}

impl GlobCache {
    #[must_use]
    pub fn new(literal_separator: bool) -> Self {
        Self {
            literal_separator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a compiled glob from cache or compile and cache it.
    pub fn get_or_compile(&self, pattern: &str) -> Result<GlobMatcher, MatchError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(glob) = cache.get(pattern) {
                return Ok(glob.clone());
            }
        }

        let glob = GlobBuilder::new(pattern)
            .literal_separator(self.literal_separator)
            .build()
            .map_err(|e| MatchError::InvalidGlob {
                pattern: pattern.to_string(),
                message: e.kind().to_string(),
            })?
            .compile_matcher();

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(pattern.to_string(), glob.clone());

        Ok(glob)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Level matching
// =============================================================================

/// Level matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMatch {
    Exact,
    /// Numeric ordering. With `ascending == false` a smaller value outranks a
    /// larger one.
    Ordered { ascending: bool },
    BitMask,
}

impl LevelMatch {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Ordered { .. } => "ordered",
            Self::BitMask => "bitmask",
        }
    }
}

impl Default for LevelMatch {
    fn default() -> Self {
        Self::Ordered { ascending: false }
    }
}

impl LevelMatcher for LevelMatch {
    fn match_level(&self, owned: i64, required: i64) -> bool {
        match *self {
            Self::Exact => owned == required,
            Self::Ordered { ascending: true } => owned >= required,
            Self::Ordered { ascending: false } => owned <= required,
            Self::BitMask => owned & required == required,
        }
    }
}

/// The matcher pair used by a compiled store.
#[derive(Debug, Default)]
pub struct MatcherConfig {
    pub resource: ResourceMatch,
    pub level: LevelMatch,
}

impl MatcherConfig {
    #[must_use]
    pub fn new(resource: ResourceMatch, level: LevelMatch) -> Self {
        Self { resource, level }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -------------------------------------------------------------------------
    // Resource matchers
    // -------------------------------------------------------------------------

    #[test]
    fn test_exact_and_prefix() {
        let exact = ResourceMatch::Exact;
        assert!(exact.match_resource("/parents/1", "/parents/1").unwrap());
        assert!(!exact.match_resource("/parents/1", "/parents/12").unwrap());

        let prefix = ResourceMatch::Prefix;
        assert!(prefix.match_resource("/parents/1", "/parents/12").unwrap());
        assert!(!prefix.match_resource("/parents/12", "/parents/1").unwrap());
        assert!(prefix.match_resource("", "anything").unwrap());
    }

    #[test]
    fn test_regex_is_unanchored_and_cached() {
        let matcher = ResourceMatch::regex();
        assert!(matcher.match_resource("/parents/12422/.*", "/parents/12422/examples/").unwrap());
        assert!(!matcher.match_resource("/parents/12422/.*", "/parents/12423/examples/").unwrap());
        assert!(matcher.match_resource("12422", "/parents/12422").unwrap());

        let ResourceMatch::Regex(cache) = &matcher else {
            unreachable!()
        };
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalid_regex_is_an_error_and_not_cached() {
        let matcher = ResourceMatch::regex();
        let err = matcher.match_resource("(unclosed", "x").unwrap_err();
        assert!(matches!(err, MatchError::InvalidRegex { ref pattern, .. } if pattern == "(unclosed"));

        // still an error on retry
        assert!(matcher.match_resource("(unclosed", "x").is_err());
        let ResourceMatch::Regex(cache) = &matcher else {
            unreachable!()
        };
        assert!(cache.is_empty());
    }

    #[test]
    fn test_glob_star_crosses_separator_by_default() {
        let matcher = ResourceMatch::glob();
        assert!(matcher.match_resource("/parents/12422/*", "/parents/12422/examples/").unwrap());
        assert!(matcher.match_resource("/parents/12422/*", "/parents/12422/a/b").unwrap());
        assert!(!matcher.match_resource("/parents/12422/*", "/parents/12423/examples/").unwrap());
        assert!(matcher.match_resource("/parents/?/x", "/parents/7/x").unwrap());
        assert!(matcher.match_resource("/parents/[0-9]/x", "/parents/7/x").unwrap());
        assert!(matcher.match_resource("/{books,shelves}/1", "/shelves/1").unwrap());
    }

    #[test]
    fn test_glob_literal_separator() {
        let matcher = ResourceMatch::glob_with_literal_separator();
        assert!(matcher.match_resource("/parents/*", "/parents/12422").unwrap());
        assert!(!matcher.match_resource("/parents/*", "/parents/12422/examples").unwrap());
        assert!(matcher.match_resource("/parents/**", "/parents/12422/examples").unwrap());
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let matcher = ResourceMatch::glob();
        let err = matcher.match_resource("/parents/[12", "/parents/1").unwrap_err();
        assert!(matches!(err, MatchError::InvalidGlob { .. }));
    }

    // -------------------------------------------------------------------------
    // Level matchers
    // -------------------------------------------------------------------------

    #[test]
    fn test_ordered_default_polarity() {
        let matcher = LevelMatch::default();
        assert!(!matcher.match_level(15, 1));
        assert!(matcher.match_level(1, 15));
        assert!(matcher.match_level(5, 5));

        let ascending = LevelMatch::Ordered { ascending: true };
        assert!(ascending.match_level(15, 1));
        assert!(!ascending.match_level(1, 15));
    }

    #[test]
    fn test_bitmask() {
        let matcher = LevelMatch::BitMask;
        assert!(matcher.match_level(0b111, 0b101));
        assert!(!matcher.match_level(0b100, 0b101));
        assert!(matcher.match_level(0, 0));
        assert!(!matcher.match_level(0, 0b1));
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_exact_is_equality(pattern in ".{0,12}", resource in ".{0,12}") {
            let got = ResourceMatch::Exact.match_resource(&pattern, &resource).unwrap();
            prop_assert_eq!(got, pattern == resource);
        }

        #[test]
        fn prop_prefix_is_starts_with(pattern in "[a-c/]{0,4}", resource in "[a-c/]{0,8}") {
            let got = ResourceMatch::Prefix.match_resource(&pattern, &resource).unwrap();
            prop_assert_eq!(got, resource.starts_with(&pattern));
        }

        #[test]
        fn prop_regex_cache_agrees_with_one_shot(pattern in "[a-c.*]{1,6}", resource in "[a-c]{0,8}") {
            let matcher = ResourceMatch::regex();
            let expected = Regex::new(&pattern).map(|re| re.is_match(&resource));
            for _ in 0..2 {
                let got = matcher.match_resource(&pattern, &resource);
                match &expected {
                    Ok(want) => prop_assert_eq!(got.unwrap(), *want),
                    Err(_) => prop_assert!(got.is_err()),
                }
            }
        }

        #[test]
        fn prop_glob_cache_agrees_with_one_shot(pattern in "[a-c/*?]{1,6}", resource in "[a-c/]{0,8}") {
            let matcher = ResourceMatch::glob();
            let expected = globset::Glob::new(&pattern).map(|g| g.compile_matcher().is_match(&resource));
            for _ in 0..2 {
                let got = matcher.match_resource(&pattern, &resource);
                match &expected {
                    Ok(want) => prop_assert_eq!(got.unwrap(), *want),
                    Err(_) => prop_assert!(got.is_err()),
                }
            }
        }

        #[test]
        fn prop_ordered(owned in any::<i64>(), required in any::<i64>()) {
            let descending = LevelMatch::default();
            let ascending = LevelMatch::Ordered { ascending: true };
            prop_assert_eq!(descending.match_level(owned, required), owned <= required);
            prop_assert_eq!(ascending.match_level(owned, required), owned >= required);
            prop_assert!(descending.match_level(owned, owned));
            prop_assert!(ascending.match_level(owned, owned));
        }

        #[test]
        fn prop_bitmask(owned in any::<i64>(), required in any::<i64>()) {
            prop_assert_eq!(LevelMatch::BitMask.match_level(owned, required), owned & required == required);
            prop_assert!(LevelMatch::BitMask.match_level(required, required));
            prop_assert_eq!(LevelMatch::BitMask.match_level(0, required), required == 0);
        }
    }
}
