use thiserror::Error;

use crate::{Permission, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    MissingPermission(String),

    #[error("forbidden: requires one of roles {0:?}")]
    MissingRole(Vec<String>),
}

/// Require every permission in `required`.
pub fn authorize(principal: &Principal, required: &[Permission]) -> Result<(), AuthzError> {
    match required.iter().find(|p| !principal.has_permission(p)) {
        Some(missing) => Err(AuthzError::MissingPermission(missing.to_string())),
        None => Ok(()),
    }
}

/// Require at least one of `roles`. An empty list allows everyone.
pub fn authorize_roles(principal: &Principal, roles: &[Role]) -> Result<(), AuthzError> {
    if roles.is_empty() || roles.iter().any(|r| principal.has_role(r)) {
        return Ok(());
    }
    Err(AuthzError::MissingRole(roles.iter().map(Role::to_string).collect()))
}
