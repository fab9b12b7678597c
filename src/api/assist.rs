//! Streaming voice assistance endpoint
//!
//! Accepts a multipart utterance upload from an authenticated device and
//! streams the synthesized reply back as a chunked `audio/mpeg` body,
//! flushing chunk by chunk as the TTS producer emits them. An SSE variant
//! wraps each chunk in a base64 JSON event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::Response;
use axum::Extension;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ApiError, ApiState};
use crate::auth::{authz, Principal};
use crate::db::EnrollmentStatus;
use crate::{Error, Result};

/// Query parameters of the assistance endpoints
#[derive(Debug, Deserialize)]
pub struct AssistQuery {
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
}

/// Authorize the calling device and pull the uploaded utterance out of the
/// multipart body. Shared by both response variants.
async fn start_interaction(
    state: &ApiState,
    principal: Option<&Principal>,
    query: &AssistQuery,
    multipart: &mut Multipart,
) -> Result<mpsc::Receiver<Bytes>> {
    authz::device_matches(principal, "deviceId", &query.device_id)?;

    // The certificate authenticated the device; the enrollment state decides
    // whether it may still talk to us.
    let device = state
        .devices
        .find(&query.device_id)
        .map_err(|_| Error::Auth("unknown device".to_string()))?;
    if device.status != EnrollmentStatus::Enrolled {
        tracing::warn!(
            device_id = %device.id,
            status = device.status.as_str(),
            "assistance request from non-enrolled device"
        );
        return Err(Error::Auth("device not enrolled".to_string()));
    }

    let mut audio: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("multipart: {e}")))?
    {
        if field.name() == Some("audio") {
            audio = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("audio: {e}")))?,
            );
        }
    }

    let audio = audio.ok_or_else(|| Error::Validation("audio part missing".to_string()))?;
    if audio.is_empty() {
        return Err(Error::Validation("audio part empty".to_string()));
    }

    tracing::debug!(device_id = %device.id, audio_bytes = audio.len(), "assistance started");
    state.assistant.assist(audio.to_vec()).await
}

/// POST /voice-assistance
pub async fn assist(
    State(state): State<Arc<ApiState>>,
    principal: Option<Extension<Principal>>,
    Query(query): Query<AssistQuery>,
    mut multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    let principal = principal.as_ref().map(|ext| &ext.0);
    let chunks = start_interaction(&state, principal, &query, &mut multipart).await?;

    // Each received chunk becomes one body frame; hyper emits them as
    // chunked transfer encoding with a flush per frame.
    let stream = ReceiverStream::new(chunks).map(Ok::<Bytes, Infallible>);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Config(format!("response build: {e}")))?;

    Ok(response)
}

/// POST /voice-assistance/sse
///
/// Event-stream variant: each audio chunk is emitted as
/// `data: {"audioChunk": "<base64>"}`.
pub async fn assist_sse(
    State(state): State<Arc<ApiState>>,
    principal: Option<Extension<Principal>>,
    Query(query): Query<AssistQuery>,
    mut multipart: Multipart,
) -> std::result::Result<Sse<impl futures::Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    let principal = principal.as_ref().map(|ext| &ext.0);
    let chunks = start_interaction(&state, principal, &query, &mut multipart).await?;

    let stream = ReceiverStream::new(chunks).map(|chunk| {
        let payload = serde_json::json!({ "audioChunk": BASE64.encode(&chunk) });
        Ok(Event::default().data(payload.to_string()))
    });

    Ok(Sse::new(stream))
}
