//! Built-in guards.
//!
//! `BearerGuard` authenticates and stores the [`Principal`] in the request
//! extensions; the role and permission guards read it from there, so they
//! must be attached after a `BearerGuard`.

use std::sync::Arc;

use sato_auth::{authorize, authorize_roles, Permission, Principal, Role, TokenValidator};
use sato_core::{AccessDenied, Guard, Request};

fn extract_bearer(req: &Request) -> Result<&str, AccessDenied> {
    let header = req
        .header("authorization")
        .ok_or_else(|| AccessDenied::new("missing token"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AccessDenied::new("expected a bearer token"))?
        .trim();
    if token.is_empty() {
        return Err(AccessDenied::new("missing token"));
    }

    Ok(token)
}

fn principal(req: &Request) -> Result<&Principal, AccessDenied> {
    req.extensions()
        .get::<Principal>()
        .ok_or_else(|| AccessDenied::new("unauthenticated"))
}

/// Validates `Authorization: Bearer <token>` with a [`TokenValidator`].
pub struct BearerGuard<V: ?Sized> {
    validator: Arc<V>,
}

impl<V: TokenValidator + ?Sized> BearerGuard<V> {
    pub fn new(validator: Arc<V>) -> Self {
        Self { validator }
    }
}

impl<V: ?Sized> Clone for BearerGuard<V> {
    fn clone(&self) -> Self {
        Self {
            validator: self.validator.clone(),
        }
    }
}

impl<V: TokenValidator + ?Sized> Guard for BearerGuard<V> {
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied> {
        let principal = {
            let token = extract_bearer(req)?;
            self.validator
                .validate(token)
                .map_err(|e| AccessDenied::new(e.to_string()))?
        };
        req.extensions_mut().insert(principal);
        Ok(())
    }
}

/// Requires the principal to hold at least one of the roles.
#[derive(Debug, Clone)]
pub struct RolesGuard {
    roles: Vec<Role>,
}

impl RolesGuard {
    pub fn new(roles: impl IntoIterator<Item = impl Into<Role>>) -> Self {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl Guard for RolesGuard {
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied> {
        authorize_roles(principal(req)?, &self.roles).map_err(|e| AccessDenied::new(e.to_string()))
    }
}

/// Requires the principal to hold every permission.
#[derive(Debug, Clone)]
pub struct PermissionsGuard {
    permissions: Vec<Permission>,
}

impl PermissionsGuard {
    pub fn new(permissions: impl IntoIterator<Item = impl Into<Permission>>) -> Self {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Guard for PermissionsGuard {
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied> {
        authorize(principal(req)?, &self.permissions).map_err(|e| AccessDenied::new(e.to_string()))
    }
}

/// Requires a header, optionally with an exact value (API keys and the like).
#[derive(Debug, Clone)]
pub struct HeaderGuard {
    name: String,
    expected: Option<String>,
}

impl HeaderGuard {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: None,
        }
    }

    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: Some(value.into()),
        }
    }
}

impl Guard for HeaderGuard {
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied> {
        match (req.header(&self.name), &self.expected) {
            (None, _) => Err(AccessDenied::new(format!("missing header {}", self.name))),
            (Some(actual), Some(expected)) if actual != expected => {
                Err(AccessDenied::new(format!("invalid header {}", self.name)))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sato_auth::StaticTokenValidator;
    use sato_core::Method;

    fn bearer() -> BearerGuard<StaticTokenValidator> {
        BearerGuard::new(Arc::new(
            StaticTokenValidator::new()
                .with_token("admin-token", Principal::new("ada").with_role("admin").with_permission("*"))
                .with_token("user-token", Principal::new("bob").with_role("user")),
        ))
    }

    fn authed(token: &str) -> Request {
        let mut req = Request::new(Method::Get, "/").with_header("Authorization", format!("Bearer {token}"));
        bearer().can_activate(&mut req).unwrap();
        req
    }

    #[test]
    fn bearer_guard_stores_the_principal() {
        let req = authed("admin-token");
        assert_eq!(req.extensions().get::<Principal>().unwrap().subject, "ada");
    }

    #[test]
    fn bearer_guard_rejects_missing_malformed_and_unknown_tokens() {
        let guard = bearer();
        for req in [
            Request::new(Method::Get, "/"),
            Request::new(Method::Get, "/").with_header("authorization", "Basic abc"),
            Request::new(Method::Get, "/").with_header("authorization", "Bearer   "),
            Request::new(Method::Get, "/").with_header("authorization", "Bearer nope"),
        ] {
            let mut req = req;
            assert!(guard.can_activate(&mut req).is_err());
            assert!(req.extensions().get::<Principal>().is_none());
        }
    }

    #[test]
    fn role_and_permission_guards_need_a_principal() {
        let mut anon = Request::new(Method::Get, "/");
        assert!(RolesGuard::new(["admin"]).can_activate(&mut anon).is_err());
        assert!(PermissionsGuard::new(["users.read"]).can_activate(&mut anon).is_err());
    }

    #[test]
    fn role_and_permission_guards_check_the_principal() {
        let mut admin = authed("admin-token");
        let mut user = authed("user-token");

        RolesGuard::new(["admin"]).can_activate(&mut admin).unwrap();
        assert!(RolesGuard::new(["admin"]).can_activate(&mut user).is_err());

        PermissionsGuard::new(["users.delete"]).can_activate(&mut admin).unwrap();
        assert!(PermissionsGuard::new(["users.delete"]).can_activate(&mut user).is_err());
    }

    #[test]
    fn header_guard_checks_presence_and_value() {
        let mut req = Request::new(Method::Get, "/").with_header("X-Api-Key", "k1");
        HeaderGuard::present("x-api-key").can_activate(&mut req).unwrap();
        HeaderGuard::equals("x-api-key", "k1").can_activate(&mut req).unwrap();
        assert!(HeaderGuard::equals("x-api-key", "k2").can_activate(&mut req).is_err());
        assert!(HeaderGuard::present("x-other").can_activate(&mut req).is_err());
    }
}
