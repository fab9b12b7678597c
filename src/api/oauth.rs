//! OAuth2 login endpoints
//!
//! Google is the only wired provider. Login redirects the browser to the
//! provider's consent page; the callback exchanges the authorization code,
//! fetches the identity claims and upserts an external user.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use url::Url;

use super::auth::LoginResponse;
use super::{ApiError, ApiState};
use crate::auth::jwt::{self, UserClaims};
use crate::config::OAuthConfig;
use crate::db::User;
use crate::{Error, Result};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const PROVIDER_GOOGLE: &str = "google";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Identity claims from the provider's userinfo endpoint
#[derive(Deserialize)]
struct GoogleUserInfo {
    email: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
}

fn oauth_config<'a>(state: &'a ApiState, provider: &str) -> Result<&'a OAuthConfig> {
    if provider != PROVIDER_GOOGLE {
        tracing::warn!(provider, "oauth2 login for unsupported provider");
        return Err(Error::Validation("provider".to_string()));
    }
    state
        .oauth
        .as_ref()
        .ok_or_else(|| Error::Config("OAuth2 is not configured".to_string()))
}

/// GET /auth/oauth2/{provider}/login
pub async fn login(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> std::result::Result<Response, ApiError> {
    let oauth = oauth_config(&state, &provider)?;

    let url = Url::parse_with_params(
        GOOGLE_AUTH_URL,
        &[
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", "email profile"),
            ("state", query.state.as_str()),
        ],
    )
    .map_err(|e| Error::Config(format!("auth url: {e}")))?;

    let cookie = format!(
        "google-auth={}; Path=/; HttpOnly; Secure; SameSite=None",
        query.state
    );

    let response = Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, url.as_str())
        .header(header::SET_COOKIE, cookie)
        .body(Body::empty())
        .map_err(|e| Error::Config(format!("redirect build: {e}")))?;

    Ok(response)
}

/// GET /auth/oauth2/{provider}/callback
pub async fn callback(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> std::result::Result<Json<LoginResponse>, ApiError> {
    let oauth = oauth_config(&state, &provider)?;

    let token: TokenResponse = state
        .http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("code", query.code.as_str()),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "oauth2 code exchange failed");
            e
        })?
        .error_for_status()
        .map_err(|e| {
            tracing::error!(error = %e, "oauth2 code exchange rejected");
            Error::Backend("code exchange failed".to_string())
        })?
        .json()
        .await?;

    let info: GoogleUserInfo = state
        .http
        .get(GOOGLE_USERINFO_URL)
        .query(&[("access_token", token.access_token.as_str())])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| {
            tracing::error!(error = %e, "userinfo fetch rejected");
            Error::Backend("userinfo fetch failed".to_string())
        })?
        .json()
        .await?;

    let user = find_or_create_user(&state, &info)?;

    let claims = UserClaims::new(&user.id, &user.email);
    let token = jwt::generate(state.jwt.secret(), &claims)?;

    Ok(Json(LoginResponse { id: user.id, token }))
}

/// Fetch the user for these identity claims, creating an external user on
/// first login. No password is ever stored for external identities.
fn find_or_create_user(state: &ApiState, info: &GoogleUserInfo) -> Result<User> {
    match state.user_repo.find_by_email(&info.email) {
        Ok(user) => Ok(user),
        Err(Error::UserNotFound) => {
            let user = User::new_external(
                PROVIDER_GOOGLE,
                &info.email,
                &info.given_name,
                &info.family_name,
            );
            state.user_repo.save(&user)?;
            tracing::info!(user_id = %user.id, "external user created");
            Ok(user)
        }
        Err(e) => Err(e),
    }
}
