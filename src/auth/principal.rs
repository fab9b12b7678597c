//! Typed request principals
//!
//! The authenticated subject is carried as a request extension instead of an
//! untyped context bag; handlers pattern-match on the variant they accept.

/// Role granted to every authenticated user
pub const ROLE_USER: &str = "ROLE_USER";

/// An authenticated user
#[derive(Debug, Clone)]
pub struct UserPrincipal {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl UserPrincipal {
    /// Build a user principal from verified JWT claims
    #[must_use]
    pub fn new(id: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            roles: vec![ROLE_USER.to_string()],
        }
    }
}

/// An authenticated device, identified by its certificate subject CN
#[derive(Debug, Clone)]
pub struct DevicePrincipal {
    pub device_id: String,
}

/// The authenticated subject of a request
#[derive(Debug, Clone)]
pub enum Principal {
    User(UserPrincipal),
    Device(DevicePrincipal),
}

impl Principal {
    /// Roles held by this principal. Devices carry no roles.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        match self {
            Self::User(u) => &u.roles,
            Self::Device(_) => &[],
        }
    }
}
