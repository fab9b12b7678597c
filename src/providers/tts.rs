//! Text-to-speech provider client
//!
//! Synthesis streams: the provider's HTTP response body is forwarded chunk
//! by chunk through a bounded channel so playback can begin before the full
//! reply is synthesized.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use super::SpeechProvider;
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Channel capacity for streamed audio chunks. Bounded so a slow consumer
/// applies backpressure all the way to the provider connection.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Synthesizes speech through an OpenAI-compatible streaming audio API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl TextToSpeech {
    /// Create a new TTS client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
        })
    }
}

#[async_trait]
impl SpeechProvider for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Bytes>> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "TTS request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "TTS API error");
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!(error = %e, "TTS stream read error");
                        break;
                    }
                };

                if chunk.is_empty() {
                    continue;
                }

                if tx.send(chunk).await.is_err() {
                    // Receiver dropped: the caller cancelled. Dropping the
                    // stream closes the upstream body.
                    tracing::debug!("TTS stream cancelled by consumer");
                    return;
                }
            }

            tracing::debug!("TTS stream completed");
        });

        Ok(rx)
    }
}
