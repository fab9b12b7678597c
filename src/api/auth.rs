//! Signup and login endpoints

use std::sync::Arc;
use std::sync::LazyLock;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::auth::jwt::{self, UserClaims};
use crate::db::{Identity, User};
use crate::{Error, Result};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

/// Signup request payload
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub password: String,
    #[serde(rename = "passwordRepeat")]
    pub password_repeat: String,
}

/// Login request payload
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login success payload
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub id: String,
    pub token: String,
}

fn validate_email(email: &str) -> Result<()> {
    if email.len() < 5 || email.len() > 254 || !EMAIL_RE.is_match(email) {
        return Err(Error::Validation("email".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 8 || password.len() > 128 {
        return Err(Error::Validation("password".to_string()));
    }
    Ok(())
}

fn validate_signup(req: &SignupRequest) -> Result<()> {
    validate_email(&req.email)?;

    if req.firstname.is_empty() || req.firstname.len() > 100 {
        return Err(Error::Validation("firstname".to_string()));
    }
    if req.lastname.is_empty() || req.lastname.len() > 100 {
        return Err(Error::Validation("lastname".to_string()));
    }

    validate_password(&req.password)?;
    if req.password != req.password_repeat {
        return Err(Error::Validation("passwordRepeat".to_string()));
    }

    Ok(())
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SignupRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    validate_signup(&req)?;

    let email = req.email.to_lowercase();
    if state.user_repo.find_by_email(&email).is_ok() {
        tracing::warn!("signup for existing email");
        return Err(Error::UserAlreadyExists.into());
    }

    // bcrypt is deliberately slow; keep it off the async workers
    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(&password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| Error::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| Error::Internal(format!("failed to hash password: {e}")))?;

    let user = User::new_local(&email, &req.firstname, &req.lastname, &hash);
    state.user_repo.save(&user)?;

    tracing::info!(user_id = %user.id, "user created");
    Ok(StatusCode::CREATED)
}

/// POST /auth/login
///
/// Failed lookups and wrong passwords both return 404 so the endpoint does
/// not reveal which emails are registered.
pub async fn login(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LoginRequest>,
) -> std::result::Result<Json<LoginResponse>, ApiError> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let email = req.email.to_lowercase();
    let user = state.user_repo.find_by_email(&email).map_err(|e| {
        tracing::warn!("login for unknown email");
        e
    })?;

    let Identity::Local { password_hash } = user.identity.clone() else {
        tracing::warn!(user_id = %user.id, "login against externally-managed user");
        return Err(Error::UserNotFound.into());
    };

    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(&password, &password_hash))
        .await
        .map_err(|e| Error::Internal(format!("verify task failed: {e}")))?
        .unwrap_or(false);

    if !verified {
        tracing::warn!(user_id = %user.id, "login with wrong password");
        return Err(Error::UserNotFound.into());
    }

    let claims = UserClaims::new(&user.id, &user.email);
    let token = jwt::generate(state.jwt.secret(), &claims)?;

    Ok(Json(LoginResponse { id: user.id, token }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup_req() -> SignupRequest {
        SignupRequest {
            email: "alice@x.io".to_string(),
            firstname: "Alice".to_string(),
            lastname: "Doe".to_string(),
            password: "Str0ng!xx".to_string(),
            password_repeat: "Str0ng!xx".to_string(),
        }
    }

    #[test]
    fn test_valid_signup_passes() {
        assert!(validate_signup(&signup_req()).is_ok());
    }

    #[test]
    fn test_bad_email_rejected() {
        for email in ["", "a@b", "no-at-sign.io", "a b@x.io"] {
            let mut req = signup_req();
            req.email = email.to_string();
            assert!(validate_signup(&req).is_err(), "accepted {email:?}");
        }
    }

    #[test]
    fn test_password_rules() {
        let mut req = signup_req();
        req.password = "short".to_string();
        req.password_repeat = "short".to_string();
        assert!(validate_signup(&req).is_err());

        let mut req = signup_req();
        req.password_repeat = "Different1!".to_string();
        assert!(validate_signup(&req).is_err());

        let mut req = signup_req();
        req.password = "x".repeat(129);
        req.password_repeat = req.password.clone();
        assert!(validate_signup(&req).is_err());
    }

    #[test]
    fn test_name_rules() {
        let mut req = signup_req();
        req.firstname = String::new();
        assert!(validate_signup(&req).is_err());

        let mut req = signup_req();
        req.lastname = "x".repeat(101);
        assert!(validate_signup(&req).is_err());
    }
}
