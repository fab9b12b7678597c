//! Authorization predicates
//!
//! Predicates operate over the authenticated [`Principal`] and request
//! values. Every denial maps to 403 at the transport; the log line carries
//! the actual cause (missing principal, missing parameter, mismatch).

use super::principal::Principal;
use crate::{Error, Result};

/// Require that the principal holds at least one of the given roles
///
/// # Errors
///
/// Returns an auth error if no principal is present or no role matches
pub fn requires_any_role(principal: Option<&Principal>, required: &[&str]) -> Result<()> {
    let Some(principal) = principal else {
        tracing::warn!("authorization denied: no authenticated principal");
        return Err(Error::Auth("no authenticated principal".to_string()));
    };

    let roles = principal.roles();
    if required.iter().any(|r| roles.iter().any(|have| have == r)) {
        return Ok(());
    }

    tracing::warn!(?required, "authorization denied: missing required role");
    Err(Error::Auth("missing required role".to_string()))
}

/// Require that a path parameter equals the authenticated user's id
///
/// # Errors
///
/// Returns an auth error on missing principal, missing parameter or mismatch
pub fn user_matches_path(principal: Option<&Principal>, param: &str, value: &str) -> Result<()> {
    let Some(Principal::User(user)) = principal else {
        tracing::warn!("authorization denied: no authenticated user");
        return Err(Error::Auth("no authenticated user".to_string()));
    };

    if value.is_empty() {
        tracing::warn!(param, "authorization denied: missing path parameter");
        return Err(Error::Auth(format!("missing path parameter: {param}")));
    }

    if value != user.id {
        tracing::warn!(param, "authorization denied: user id mismatch");
        return Err(Error::Auth("user id mismatch".to_string()));
    }

    Ok(())
}

/// Require that a request parameter equals the authenticated device's id
///
/// # Errors
///
/// Returns an auth error on missing principal, missing parameter or mismatch
pub fn device_matches(principal: Option<&Principal>, param: &str, value: &str) -> Result<()> {
    let Some(Principal::Device(device)) = principal else {
        tracing::warn!("authorization denied: no authenticated device");
        return Err(Error::Auth("no authenticated device".to_string()));
    };

    if value.is_empty() {
        tracing::warn!(param, "authorization denied: missing device parameter");
        return Err(Error::Auth(format!("missing parameter: {param}")));
    }

    if value != device.device_id {
        tracing::warn!(param, "authorization denied: device id mismatch");
        return Err(Error::Auth("device id mismatch".to_string()));
    }

    Ok(())
}

/// Apply a custom predicate over the authenticated principal
///
/// # Errors
///
/// Returns an auth error if no principal is present or the predicate denies
pub fn principal_matches<F>(principal: Option<&Principal>, predicate: F) -> Result<()>
where
    F: Fn(&Principal) -> bool,
{
    let Some(principal) = principal else {
        tracing::warn!("authorization denied: no authenticated principal");
        return Err(Error::Auth("no authenticated principal".to_string()));
    };

    if predicate(principal) {
        Ok(())
    } else {
        tracing::warn!("authorization denied: predicate rejected principal");
        Err(Error::Auth("forbidden".to_string()))
    }
}
