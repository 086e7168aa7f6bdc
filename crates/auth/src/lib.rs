//! `sato-auth`: principals, roles, permissions and bearer-token validation.
//!
//! Decoupled from HTTP; the API crate's guards call into it.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod token;

pub use authorize::{authorize, authorize_roles, AuthzError};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::Role;
pub use token::{validate_claims, Claims, JwtValidator, StaticTokenValidator, TokenError, TokenValidator};
