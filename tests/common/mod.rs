//! Shared test utilities

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::sync::mpsc;
use tower::ServiceExt;

use lark::api::{self, ApiState};
use lark::auth::{DeviceCertAuth, JwtAuth};
use lark::ca::{CertSignRequest, CertSignResult, CertSigner};
use lark::db::{self, DeviceRepo, UserRepo};
use lark::providers::{CompletionProvider, SpeechProvider, TranscriptionProvider};
use lark::{DeviceService, Result, VoiceAssistant};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const CERT_HEADER: &str = "X-Forwarded-Tls-Client-Cert";

/// STT stub returning a fixed transcript
pub struct MockStt;

#[async_trait]
impl TranscriptionProvider for MockStt {
    async fn transcribe(&self, _audio: Vec<u8>) -> Result<String> {
        Ok("what's the weather".to_string())
    }
}

/// LLM stub echoing the prompt
pub struct MockLlm;

#[async_trait]
impl CompletionProvider for MockLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(format!("answer to: {prompt}"))
    }
}

/// TTS stub streaming a fixed chunk sequence
pub struct MockTts {
    pub chunks: Vec<Bytes>,
}

#[async_trait]
impl SpeechProvider for MockTts {
    async fn synthesize(&self, _text: &str) -> Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel(1);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// CA stub returning a fixed chain
pub struct StubCa;

#[async_trait]
impl CertSigner for StubCa {
    async fn sign(&self, req: &CertSignRequest) -> Result<CertSignResult> {
        Ok(CertSignResult {
            crt: format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----", req.device_id),
            ca: "-----BEGIN CERTIFICATE-----\nstub-ca\n-----END CERTIFICATE-----".to_string(),
            cert_chain: vec![],
        })
    }
}

/// The default response chunk sequence used by most tests
pub fn default_chunks() -> Vec<Bytes> {
    (0u8..4).map(|i| Bytes::from(vec![i; 128])).collect()
}

/// Build API state over an in-memory database and mock collaborators
pub fn setup_state(chunks: Vec<Bytes>) -> Arc<ApiState> {
    let pool = db::init_memory().expect("failed to init test db");
    let user_repo = UserRepo::new(pool.clone());
    let device_repo = DeviceRepo::new(pool);
    let devices = DeviceService::new(user_repo.clone(), device_repo, Arc::new(StubCa));

    let assistant = Arc::new(VoiceAssistant::new(
        Arc::new(MockStt),
        Arc::new(MockLlm),
        Arc::new(MockTts { chunks }),
    ));

    Arc::new(ApiState {
        user_repo,
        devices,
        assistant,
        jwt: JwtAuth::new(TEST_JWT_SECRET),
        cert_auth: DeviceCertAuth::new(CERT_HEADER),
        oauth: None,
        http: reqwest::Client::new(),
    })
}

/// Build the full router over mock collaborators
pub fn setup_app(chunks: Vec<Bytes>) -> (Router, Arc<ApiState>) {
    let state = setup_state(chunks);
    (api::router(Arc::clone(&state)), state)
}

/// Send a JSON POST through the router
pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Send an authenticated JSON POST through the router
pub async fn post_json_auth(
    app: &Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Collect a response body as JSON
pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Sign up and log in a user, returning (id, token)
pub async fn signup_and_login(app: &Router, email: &str, password: &str) -> (String, String) {
    let response = post_json(
        app,
        "/auth/signup",
        serde_json::json!({
            "email": email,
            "firstname": "Test",
            "lastname": "User",
            "password": password,
            "passwordRepeat": password,
        }),
    )
    .await;
    assert_eq!(response.status(), 201, "signup failed");

    let response = post_json(
        app,
        "/auth/login",
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(response.status(), 200, "login failed");

    let json = response_json(response).await;
    (
        json["id"].as_str().unwrap().to_string(),
        json["token"].as_str().unwrap().to_string(),
    )
}

/// Register a device for a user, returning (device_id, otp)
pub async fn register_device(app: &Router, user_id: &str, token: &str) -> (String, String) {
    let response = post_json_auth(
        app,
        &format!("/users/{user_id}/devices"),
        token,
        serde_json::json!({ "name": "Pi" }),
    )
    .await;
    assert_eq!(response.status(), 200, "device registration failed");

    let json = response_json(response).await;
    (
        json["deviceId"].as_str().unwrap().to_string(),
        json["otp"].as_str().unwrap().to_string(),
    )
}

/// Percent-encode a PEM certificate the way a front proxy does before
/// placing it in a forwarding header
pub fn encode_cert_header(pem: &str) -> String {
    utf8_percent_encode(pem, NON_ALPHANUMERIC).to_string()
}

/// Build a multipart/form-data body carrying a single `audio` part
pub fn multipart_audio(boundary: &str, audio: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"audio\"; filename=\"utterance.wav\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(audio);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
