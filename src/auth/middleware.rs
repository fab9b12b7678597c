//! Authentication middleware
//!
//! Each scheme validates the request credentials and stores a
//! [`Principal`] extension for downstream authorization and handlers.
//! Failures are logged with their cause; clients only see 401.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use percent_encoding::percent_decode_str;

use super::principal::{DevicePrincipal, Principal, UserPrincipal};
use super::jwt;
use crate::pki;

/// State for bearer-token user authentication
#[derive(Clone)]
pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    /// Signing secret bytes
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

/// Extract the bearer token from the Authorization header
fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware requiring a valid user JWT
pub async fn require_user(
    State(auth): State<JwtAuth>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = bearer_token(&req) else {
        tracing::debug!("missing or malformed Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let claims = jwt::verify(auth.secret(), token).map_err(|e| {
        tracing::warn!(error = %e, "user authentication failed");
        StatusCode::UNAUTHORIZED
    })?;

    let principal = Principal::User(UserPrincipal::new(&claims.id, &claims.email));
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// State for forwarded-certificate device authentication
#[derive(Clone)]
pub struct DeviceCertAuth {
    header: String,
}

impl DeviceCertAuth {
    /// `header` names the request header the trusted front proxy fills
    /// with the client certificate after terminating mTLS.
    #[must_use]
    pub fn new(header: &str) -> Self {
        Self {
            header: header.to_string(),
        }
    }
}

/// Middleware requiring a forwarded device certificate.
///
/// The header carries a PEM certificate, possibly percent-encoded by the
/// proxy. The certificate's subject common name becomes the device id.
pub async fn require_device(
    State(auth): State<DeviceCertAuth>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(raw) = req
        .headers()
        .get(&auth.header)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::debug!(header = %auth.header, "certificate header missing");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let pem = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| {
            tracing::warn!(error = %e, "certificate header is not valid UTF-8");
            StatusCode::UNAUTHORIZED
        })?
        .into_owned();

    let device_id = pki::subject_common_name(pem.as_bytes()).map_err(|e| {
        tracing::warn!(error = %e, "device certificate rejected");
        StatusCode::UNAUTHORIZED
    })?;

    let principal = Principal::Device(DevicePrincipal { device_id });
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&req), None);

        req.headers_mut().insert(
            "authorization",
            HeaderValue::from_static("Bearer tok-123"),
        );
        assert_eq!(bearer_token(&req), Some("tok-123"));

        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&req), None);
    }
}
