//! Provider clients for speech-to-text, completion and text-to-speech
//!
//! Thin adapters over an OpenAI-compatible HTTP API. Each concern sits
//! behind a trait so the assistant pipeline and its tests can swap
//! implementations.

mod llm;
mod stt;
mod tts;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

pub use llm::Completion;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

/// Converts user audio into text
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe WAV audio bytes to text
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String>;
}

/// Generates a reply for a transcribed prompt
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Produce the assistant's reply text for the prompt
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Synthesizes speech as a progressive stream of audio chunks
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Start synthesis, returning a bounded receiver of MPEG audio chunks
    /// in playback order. Dropping the receiver cancels the synthesis and
    /// releases the upstream connection.
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Bytes>>;
}
