//! Device registration and enrollment
//!
//! The enrollment lifecycle is a one-way state machine:
//! created -> enrolled -> disabled. Registration issues a single-use OTP
//! shown once to the registrant; enrollment consumes it, delegates CSR
//! signing to the CA, and clears the OTP.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::Rng;

use crate::ca::{CertSignRequest, CertSignResult, CertSigner};
use crate::db::{Device, DeviceRepo, EnrollmentStatus, UserRepo};
use crate::{Error, Result};

/// OTP length issued at registration
const OTP_LENGTH: usize = 16;

/// Alphabet the OTP is drawn from
const OTP_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz\
ABCDEFGHIJKLMNOPQRSTUVWXYZ\
0123456789\
!@#$%^&*()-_=+[]{}<>?/|";

/// A user-initiated request to register a new device
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub user_id: String,
    pub name: String,
}

/// Result of a successful registration. The OTP is returned exactly once.
#[derive(Debug, Clone)]
pub struct DeviceRegistrationResult {
    pub device_id: String,
    pub user_id: String,
    pub name: String,
    pub otp: String,
}

/// A device's request to enroll and obtain a signed certificate
#[derive(Debug, Clone)]
pub struct DeviceEnrollment {
    pub user_id: String,
    pub device_id: String,
    pub otp: String,
    pub csr: String,
}

/// Device management service
#[derive(Clone)]
pub struct DeviceService {
    users: UserRepo,
    devices: DeviceRepo,
    signer: Arc<dyn CertSigner>,
}

impl DeviceService {
    /// Create the service over its repositories and CA signer
    #[must_use]
    pub fn new(users: UserRepo, devices: DeviceRepo, signer: Arc<dyn CertSigner>) -> Self {
        Self {
            users,
            devices,
            signer,
        }
    }

    /// Register a new device for a user, issuing its enrollment OTP
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the owning user does not exist
    pub fn register(&self, reg: &DeviceRegistration) -> Result<DeviceRegistrationResult> {
        let user = self.users.find(&reg.user_id).map_err(|e| {
            tracing::error!(user_id = %reg.user_id, "device registration for unknown user");
            e
        })?;

        let otp = generate_otp(OTP_LENGTH);
        let device = Device::new(&user.id, &reg.name, &otp);
        self.devices.save(&device)?;

        tracing::info!(device_id = %device.id, user_id = %user.id, "device registered");

        Ok(DeviceRegistrationResult {
            device_id: device.id,
            user_id: user.id,
            name: reg.name.clone(),
            otp,
        })
    }

    /// Enroll a device: verify ownership and OTP, have the CA sign the CSR,
    /// then persist the enrolled state and clear the OTP.
    ///
    /// Every precondition failure collapses into the same opaque
    /// `EnrollmentFailed` error so callers cannot probe which part was
    /// wrong; the logs keep the distinction.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentFailed` on any precondition mismatch, or the CA
    /// error if signing fails
    pub async fn enroll(&self, enr: &DeviceEnrollment) -> Result<CertSignResult> {
        let device = self.devices.find(&enr.device_id).map_err(|_| {
            tracing::warn!(device_id = %enr.device_id, "enrollment for unknown device");
            Error::EnrollmentFailed
        })?;

        if device.user_id.as_deref() != Some(enr.user_id.as_str()) {
            tracing::warn!(device_id = %enr.device_id, "enrollment user mismatch");
            return Err(Error::EnrollmentFailed);
        }

        if device.status != EnrollmentStatus::Created {
            tracing::warn!(
                device_id = %enr.device_id,
                status = device.status.as_str(),
                "enrollment attempted outside created state"
            );
            return Err(Error::EnrollmentFailed);
        }

        // The stored OTP must be present and equal; absence means it was
        // already consumed.
        let otp_ok = device
            .otp
            .as_deref()
            .is_some_and(|stored| constant_time_eq(stored.as_bytes(), enr.otp.as_bytes()));
        if !otp_ok {
            tracing::warn!(device_id = %enr.device_id, "enrollment OTP rejected");
            return Err(Error::EnrollmentFailed);
        }

        let signed = self
            .signer
            .sign(&CertSignRequest {
                csr: enr.csr.clone(),
                device_id: device.id.clone(),
            })
            .await?;

        self.devices.mark_enrolled(&device.id)?;

        tracing::info!(device_id = %device.id, "device enrolled");
        Ok(signed)
    }

    /// Mark a device disabled. Runtime authorization rejects disabled
    /// devices; certificate revocation at the proxy is out of scope here.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no such device exists
    pub fn disable(&self, device_id: &str) -> Result<()> {
        self.devices.mark_disabled(device_id)?;
        tracing::info!(device_id, "device disabled");
        Ok(())
    }

    /// Look up a device by id
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no such device exists
    pub fn find(&self, device_id: &str) -> Result<Device> {
        self.devices.find(device_id)
    }
}

/// Generate a cryptographically random OTP of the given length
fn generate_otp(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..OTP_CHARSET.len());
            OTP_CHARSET[idx] as char
        })
        .collect()
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::db::{init_memory, User};

    /// CA stub returning a fixed chain
    struct StubSigner;

    #[async_trait]
    impl CertSigner for StubSigner {
        async fn sign(&self, req: &CertSignRequest) -> Result<CertSignResult> {
            Ok(CertSignResult {
                crt: format!("cert-for-{}", req.device_id),
                ca: "stub-ca".to_string(),
                cert_chain: vec![],
            })
        }
    }

    fn setup() -> (DeviceService, String) {
        let pool = init_memory().unwrap();
        let users = UserRepo::new(pool.clone());
        let devices = DeviceRepo::new(pool);

        let user = User::new_local("owner@x.io", "Owner", "One", "hash");
        users.save(&user).unwrap();

        let service = DeviceService::new(users, devices, Arc::new(StubSigner));
        (service, user.id)
    }

    fn register(service: &DeviceService, user_id: &str) -> DeviceRegistrationResult {
        service
            .register(&DeviceRegistration {
                user_id: user_id.to_string(),
                name: "Pi".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_otp_generator_properties() {
        let a = generate_otp(16);
        let b = generate_otp(16);

        assert_eq!(a.len(), 16);
        assert!(a.bytes().all(|c| OTP_CHARSET.contains(&c)));
        // Two consecutive 16-char draws from a ~90 symbol alphabet collide
        // with negligible probability.
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"otp-123", b"otp-123"));
        assert!(!constant_time_eq(b"otp-123", b"otp-124"));
        assert!(!constant_time_eq(b"otp-123", b"otp-12"));
    }

    #[test]
    fn test_register_issues_otp() {
        let (service, user_id) = setup();
        let result = register(&service, &user_id);

        assert_eq!(result.otp.len(), OTP_LENGTH);
        assert_eq!(result.user_id, user_id);

        let device = service.find(&result.device_id).unwrap();
        assert_eq!(device.status, EnrollmentStatus::Created);
    }

    #[test]
    fn test_register_unknown_user_rejected() {
        let (service, _) = setup();
        let result = service.register(&DeviceRegistration {
            user_id: "ghost".to_string(),
            name: "Pi".to_string(),
        });
        assert!(matches!(result, Err(Error::UserNotFound)));
    }

    #[tokio::test]
    async fn test_enroll_happy_path_consumes_otp() {
        let (service, user_id) = setup();
        let reg = register(&service, &user_id);

        let signed = service
            .enroll(&DeviceEnrollment {
                user_id: user_id.clone(),
                device_id: reg.device_id.clone(),
                otp: reg.otp.clone(),
                csr: "-----BEGIN CERTIFICATE REQUEST-----".to_string(),
            })
            .await
            .unwrap();

        assert!(signed.crt.starts_with("cert-for-"));

        let device = service.find(&reg.device_id).unwrap();
        assert_eq!(device.status, EnrollmentStatus::Enrolled);
        assert!(device.otp.is_none());

        // The OTP is single-use: the same enrollment must now fail
        let second = service
            .enroll(&DeviceEnrollment {
                user_id,
                device_id: reg.device_id,
                otp: reg.otp,
                csr: "csr".to_string(),
            })
            .await;
        assert!(matches!(second, Err(Error::EnrollmentFailed)));
    }

    #[tokio::test]
    async fn test_enroll_wrong_otp_leaves_state_unchanged() {
        let (service, user_id) = setup();
        let reg = register(&service, &user_id);

        let result = service
            .enroll(&DeviceEnrollment {
                user_id,
                device_id: reg.device_id.clone(),
                otp: "wrong-otp-wrong-ot".to_string(),
                csr: "csr".to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::EnrollmentFailed)));

        let device = service.find(&reg.device_id).unwrap();
        assert_eq!(device.status, EnrollmentStatus::Created);
        assert!(device.otp.is_some());
    }

    #[tokio::test]
    async fn test_enroll_wrong_user_rejected() {
        let (service, user_id) = setup();
        let reg = register(&service, &user_id);

        let result = service
            .enroll(&DeviceEnrollment {
                user_id: "someone-else".to_string(),
                device_id: reg.device_id,
                otp: reg.otp,
                csr: "csr".to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::EnrollmentFailed)));
    }

    #[tokio::test]
    async fn test_enroll_unknown_device_is_opaque() {
        let (service, user_id) = setup();

        let result = service
            .enroll(&DeviceEnrollment {
                user_id,
                device_id: "ghost-device".to_string(),
                otp: "whatever".to_string(),
                csr: "csr".to_string(),
            })
            .await;
        // Same error as a wrong OTP: not distinguishable externally
        assert!(matches!(result, Err(Error::EnrollmentFailed)));
    }

    #[tokio::test]
    async fn test_disable_is_terminal() {
        let (service, user_id) = setup();
        let reg = register(&service, &user_id);

        service.disable(&reg.device_id).unwrap();
        let device = service.find(&reg.device_id).unwrap();
        assert_eq!(device.status, EnrollmentStatus::Disabled);

        // No backward transition: enrollment after disable fails
        let result = service
            .enroll(&DeviceEnrollment {
                user_id,
                device_id: reg.device_id,
                otp: reg.otp,
                csr: "csr".to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::EnrollmentFailed)));
    }
}
