//! CA signing adapter
//!
//! Posts device CSRs to an external certificate authority. Each request is
//! authorized by a short-lived one-time token minted locally with the
//! deployment's provisioner key (ES256), scoped to the device common name
//! and the CA audience.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CaConfig;
use crate::{Error, Result};

/// One-time token lifetime
const OTT_VALIDITY_SECS: i64 = 60;

/// Length of the token's unique nonce
const OTT_NONCE_LEN: usize = 64;

/// A certificate signing request for a device
#[derive(Debug, Clone)]
pub struct CertSignRequest {
    /// PEM-encoded CSR
    pub csr: String,

    /// Device identifier, equal to the CSR's subject common name
    pub device_id: String,
}

/// Result of a successful signing operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertSignResult {
    /// PEM-encoded leaf certificate issued to the device
    pub crt: String,

    /// PEM-encoded certificate of the issuing CA
    pub ca: String,

    /// Ordered certificate chain, leaf first
    #[serde(rename = "certChain", default)]
    pub cert_chain: Vec<String>,
}

/// Signs device CSRs
#[async_trait]
pub trait CertSigner: Send + Sync {
    /// Sign the CSR, returning the issued certificate and chain
    async fn sign(&self, req: &CertSignRequest) -> Result<CertSignResult>;
}

/// Claims of the one-time authorization token the CA expects
#[derive(Serialize)]
struct OttClaims {
    jti: String,
    sub: String,
    iss: String,
    aud: Vec<String>,
    nbf: i64,
    exp: i64,
    sans: Vec<String>,
}

#[derive(Serialize)]
struct SignRequestBody<'a> {
    csr: &'a str,
    ott: &'a str,
}

/// HTTPS CA signing adapter
pub struct HttpCaSigner {
    config: CaConfig,
    signing_key: EncodingKey,
    client: reqwest::Client,
}

impl HttpCaSigner {
    /// Create a signer from CA configuration. The configured trust root, if
    /// any, is pinned for the TLS connection to the CA.
    ///
    /// # Errors
    ///
    /// Returns error if the provisioner key or trust root does not parse
    pub fn new(config: CaConfig) -> Result<Self> {
        let signing_key = EncodingKey::from_ec_pem(config.provisioner_key_pem.as_bytes())
            .map_err(|e| Error::Config(format!("invalid provisioner key: {e}")))?;

        let mut builder = reqwest::Client::builder();
        if !config.root_pem.is_empty() {
            let root = reqwest::Certificate::from_pem(config.root_pem.as_bytes())
                .map_err(|e| Error::Config(format!("invalid CA trust root: {e}")))?;
            builder = builder.add_root_certificate(root);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build CA client: {e}")))?;

        Ok(Self {
            config,
            signing_key,
            client,
        })
    }

    /// Mint the one-time authorization token for a device common name
    fn generate_ott(&self, device_cn: &str) -> Result<String> {
        let now = Utc::now().timestamp();

        let jti: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(OTT_NONCE_LEN)
            .map(char::from)
            .collect();

        let claims = OttClaims {
            jti,
            sub: device_cn.to_string(),
            iss: self.config.provisioner_name.clone(),
            aud: vec![self.config.url.clone()],
            nbf: now,
            exp: now + OTT_VALIDITY_SECS,
            sans: vec![device_cn.to_string()],
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid.clone_from(&self.config.key_id);

        encode(&header, &claims, &self.signing_key)
            .map_err(|e| Error::Certificate(format!("failed to sign one-time token: {e}")))
    }
}

#[async_trait]
impl CertSigner for HttpCaSigner {
    async fn sign(&self, req: &CertSignRequest) -> Result<CertSignResult> {
        let ott = self.generate_ott(&req.device_id)?;
        let url = format!("{}/1.0/sign", self.config.url);

        let response = self
            .client
            .post(&url)
            .json(&SignRequestBody {
                csr: &req.csr,
                ott: &ott,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "CA request failed");
                e
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "CA rejected signing request");
            return Err(Error::CaSign {
                status: status.as_u16(),
                body,
            });
        }

        let result: CertSignResult = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse CA response");
            e
        })?;

        tracing::info!(device_id = %req.device_id, "certificate signed");
        Ok(result)
    }
}
