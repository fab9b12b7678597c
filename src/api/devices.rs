//! Device registration and enrollment endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::auth::{authz, Principal, ROLE_USER};
use crate::ca::CertSignResult;
use crate::devices::{DeviceEnrollment, DeviceRegistration};

/// Registration request payload
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

/// Registration response. The OTP appears here once and is never
/// retrievable again.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
    pub otp: String,
}

/// Enrollment request payload
#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub csr: String,
    pub otp: String,
}

/// Enrollment response wrapping the signed chain
#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    #[serde(rename = "certSign")]
    pub cert_sign: CertSignResult,
}

/// POST /users/{userId}/devices
pub async fn register(
    State(state): State<Arc<ApiState>>,
    principal: Option<Extension<Principal>>,
    Path(user_id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let principal = principal.as_ref().map(|ext| &ext.0);
    authz::requires_any_role(principal, &[ROLE_USER])?;
    authz::user_matches_path(principal, "userId", &user_id)?;

    let result = state.devices.register(&DeviceRegistration {
        user_id,
        name: req.name,
    })?;

    Ok(Json(RegisterResponse {
        device_id: result.device_id,
        user_id: result.user_id,
        name: result.name,
        otp: result.otp,
    }))
}

/// POST /users/{userId}/devices/{deviceId}/enroll
///
/// Unauthenticated; the OTP issued at registration gates the operation.
pub async fn enroll(
    State(state): State<Arc<ApiState>>,
    Path((user_id, device_id)): Path<(String, String)>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let signed = state
        .devices
        .enroll(&DeviceEnrollment {
            user_id,
            device_id,
            otp: req.otp,
            csr: req.csr,
        })
        .await?;

    Ok(Json(EnrollResponse { cert_sign: signed }))
}
