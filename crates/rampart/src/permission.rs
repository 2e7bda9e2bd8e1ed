//! Caller permissions as seen by predicates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A privilege level granted over a set of resource patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub level: i64,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Permission {
    #[must_use]
    pub fn new<I, S>(level: i64, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            level,
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable, cheaply clonable permission list bound to the `u` variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(Arc<[Permission]>);

impl PermissionSet {
    #[must_use]
    pub fn new(permissions: &[Permission]) -> Self {
        Self(permissions.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Permission] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Permission> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

impl From<Vec<Permission>> for PermissionSet {
    fn from(permissions: Vec<Permission>) -> Self {
        Self(permissions.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_permission_list() {
        let json = r#"[{"level": 1, "resources": ["/parents/1/*"]}, {"level": 15}]"#;
        let permissions: Vec<Permission> = serde_json::from_str(json).unwrap();

        assert_eq!(permissions[0], Permission::new(1, ["/parents/1/*"]));
        assert!(permissions[1].resources.is_empty());

        let set = PermissionSet::from(permissions);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).map(|p| p.level), Some(15));
    }
}
