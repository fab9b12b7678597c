//! Authentication and authorization
//!
//! Two authentication schemes feed a typed [`Principal`] request extension:
//! bearer user JWTs and forwarded device certificates. Authorization
//! predicates in [`authz`] operate over that principal.

pub mod authz;
pub mod jwt;
pub mod middleware;
mod principal;

pub use jwt::UserClaims;
pub use middleware::{DeviceCertAuth, JwtAuth};
pub use principal::{DevicePrincipal, Principal, UserPrincipal, ROLE_USER};
