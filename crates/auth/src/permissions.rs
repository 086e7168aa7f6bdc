use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. `"users.read"`).
///
/// A granted permission may be the wildcard `"*"` (everything) or end in
/// `".*"` (everything under that prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self == required {
            return true;
        }
        match self.as_str().strip_suffix(".*") {
            Some(prefix) => required
                .as_str()
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')),
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_grant_by_prefix() {
        let users_any = Permission::new("users.*");
        assert!(users_any.grants(&Permission::new("users.read")));
        assert!(users_any.grants(&Permission::new("users.admin.delete")));
        assert!(!users_any.grants(&Permission::new("usersx.read")));
        assert!(!users_any.grants(&Permission::new("orders.read")));

        assert!(Permission::new("*").grants(&Permission::new("anything")));
        assert!(Permission::new("users.read").grants(&Permission::new("users.read")));
        assert!(!Permission::new("users.read").grants(&Permission::new("users.write")));
    }
}
