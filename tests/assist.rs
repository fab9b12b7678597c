//! Streaming assistant endpoint integration tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tower::ServiceExt;

use lark::pki;
use lark::voice::samples_to_wav;

mod common;
use common::{
    default_chunks, encode_cert_header, multipart_audio, register_device, setup_app,
    signup_and_login, CERT_HEADER,
};

const BOUNDARY: &str = "lark-test-boundary";

/// One second of 16 kHz silence as a WAV file
fn silence_wav() -> Vec<u8> {
    samples_to_wav(&vec![0i16; 16000], 1, 16000).unwrap()
}

/// Walk a user through signup, registration and enrollment; returns the
/// enrolled device id
async fn enrolled_device(app: &Router) -> String {
    let (user_id, token) = signup_and_login(app, "alice@x.io", "Str0ng!xx").await;
    let (device_id, otp) = register_device(app, &user_id, &token).await;

    let response = common::post_json(
        app,
        &format!("/users/{user_id}/devices/{device_id}/enroll"),
        serde_json::json!({ "csr": "-----BEGIN CERTIFICATE REQUEST-----", "otp": otp }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    device_id
}

fn assist_request(device_id: &str, cert_cn: &str, uri_base: &str) -> Request<Body> {
    let cert = pki::self_signed_cert(cert_cn).unwrap();
    Request::builder()
        .method("POST")
        .uri(format!("{uri_base}?deviceId={device_id}"))
        .header(CERT_HEADER, encode_cert_header(&cert))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_audio(BOUNDARY, &silence_wav())))
        .unwrap()
}

#[tokio::test]
async fn test_streaming_assist_returns_concatenated_chunks() {
    let chunks = default_chunks();
    let (app, _) = setup_app(chunks.clone());
    let device_id = enrolled_device(&app).await;

    let response = app
        .clone()
        .oneshot(assist_request(&device_id, &device_id, "/voice-assistance"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "audio/mpeg"
    );
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-cache"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
    assert_eq!(body.to_vec(), expected);
}

#[tokio::test]
async fn test_assist_without_certificate_unauthorized() {
    let (app, _) = setup_app(default_chunks());
    let device_id = enrolled_device(&app).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/voice-assistance?deviceId={device_id}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_audio(BOUNDARY, &silence_wav())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assist_device_mismatch_forbidden() {
    let (app, _) = setup_app(default_chunks());
    let device_id = enrolled_device(&app).await;

    // Certificate CN names a different device than the request targets
    let response = app
        .clone()
        .oneshot(assist_request(&device_id, "other-device", "/voice-assistance"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assist_unenrolled_device_forbidden() {
    let (app, _) = setup_app(default_chunks());
    let (user_id, token) = signup_and_login(&app, "alice@x.io", "Str0ng!xx").await;
    // Registered but never enrolled
    let (device_id, _) = register_device(&app, &user_id, &token).await;

    let response = app
        .clone()
        .oneshot(assist_request(&device_id, &device_id, "/voice-assistance"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assist_disabled_device_forbidden() {
    let (app, state) = setup_app(default_chunks());
    let device_id = enrolled_device(&app).await;

    state.devices.disable(&device_id).unwrap();

    let response = app
        .clone()
        .oneshot(assist_request(&device_id, &device_id, "/voice-assistance"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assist_missing_audio_part_rejected() {
    let (app, _) = setup_app(default_chunks());
    let device_id = enrolled_device(&app).await;

    let cert = pki::self_signed_cert(&device_id).unwrap();
    let empty_form = format!("--{BOUNDARY}--\r\n");
    let request = Request::builder()
        .method("POST")
        .uri(format!("/voice-assistance?deviceId={device_id}"))
        .header(CERT_HEADER, encode_cert_header(&cert))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(empty_form))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_variant_emits_base64_chunks() {
    let chunks = default_chunks();
    let (app, _) = setup_app(chunks.clone());
    let device_id = enrolled_device(&app).await;

    let response = app
        .clone()
        .oneshot(assist_request(
            &device_id,
            &device_id,
            "/voice-assistance/sse",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    let decoded: Vec<Bytes> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| {
            let event: serde_json::Value = serde_json::from_str(data).unwrap();
            let b64 = event["audioChunk"].as_str().unwrap();
            Bytes::from(BASE64.decode(b64).unwrap())
        })
        .collect();

    assert_eq!(decoded, chunks);
}
