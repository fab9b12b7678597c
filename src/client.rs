//! Device-side backend client
//!
//! Uploads recorded utterances as multipart form-data and exposes the
//! streamed reply as a bounded chunk channel. Also drives the one-time
//! enrollment exchange.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ca::CertSignResult;
use crate::daemon::AssistStream;
use crate::{Error, Result};

/// Chunk channel capacity; a single slot lets playback pace the download
const CHUNK_CAPACITY: usize = 1;

#[derive(Serialize)]
struct EnrollRequestBody<'a> {
    csr: &'a str,
    otp: &'a str,
}

#[derive(Deserialize)]
struct EnrollResponseBody {
    #[serde(rename = "certSign")]
    cert_sign: CertSignResult,
}

/// HTTP client for the lark backend
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    device_id: String,
}

impl BackendClient {
    /// Create a client without a client certificate (enrollment phase)
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, device_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build backend client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    /// Create a client presenting the device certificate for mTLS.
    /// `identity_pem` holds the PEM private key followed by the leaf
    /// certificate.
    ///
    /// # Errors
    ///
    /// Returns error if the identity does not parse
    pub fn with_identity(base_url: &str, device_id: &str, identity_pem: &[u8]) -> Result<Self> {
        let identity = reqwest::Identity::from_pem(identity_pem)
            .map_err(|e| Error::Config(format!("invalid device identity: {e}")))?;

        let http = reqwest::Client::builder()
            .identity(identity)
            .build()
            .map_err(|e| Error::Config(format!("failed to build backend client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    /// Enroll this device: post the CSR and OTP, receive the signed chain
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the backend rejects it
    pub async fn enroll(&self, user_id: &str, otp: &str, csr: &str) -> Result<CertSignResult> {
        let url = format!(
            "{}/users/{}/devices/{}/enroll",
            self.base_url, user_id, self.device_id
        );

        let response = self
            .http
            .post(&url)
            .json(&EnrollRequestBody { csr, otp })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "enrollment rejected");
            return Err(Error::Backend(format!("enrollment failed: {status}")));
        }

        let body: EnrollResponseBody = response.json().await?;
        tracing::info!(device_id = %self.device_id, "device enrolled");
        Ok(body.cert_sign)
    }
}

#[async_trait]
impl AssistStream for BackendClient {
    async fn assist(&self, path: &Path) -> Result<mpsc::Receiver<Bytes>> {
        let audio = tokio::fs::read(path).await?;
        tracing::debug!(bytes = audio.len(), "uploading utterance");

        let form = reqwest::multipart::Form::new().part(
            "audio",
            reqwest::multipart::Part::bytes(audio)
                .file_name("utterance.wav")
                .mime_str("audio/wav")
                .map_err(|e| Error::Backend(e.to_string()))?,
        );

        let url = format!(
            "{}/voice-assistance?deviceId={}",
            self.base_url, self.device_id
        );

        let response = self.http.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "assist request rejected");
            return Err(Error::Backend(format!("assist failed: {status}")));
        }

        let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(error = %e, "response stream error");
                        break;
                    }
                };

                if chunk.is_empty() {
                    continue;
                }

                if tx.send(chunk).await.is_err() {
                    // Playback stopped consuming; close the body
                    tracing::debug!("response stream cancelled");
                    return;
                }
            }

            tracing::debug!("response stream finished");
        });

        Ok(rx)
    }
}
