//! Server-side voice assistant orchestration
//!
//! Composes the three pipeline stages: transcribe the caller's audio, run
//! the transcript through the completion provider, and stream the
//! synthesized reply back as audio chunks. The returned receiver is a lazy,
//! finite, non-restartable sequence in strict producer order.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::providers::{CompletionProvider, SpeechProvider, TranscriptionProvider};
use crate::Result;

/// Capacity of the outbound chunk channel. One slot keeps the forwarder a
/// single chunk ahead of the consumer, so cancellation propagates within
/// one chunk boundary.
const FORWARD_CAPACITY: usize = 1;

/// Voice assistant pipeline over injected providers
pub struct VoiceAssistant {
    stt: Arc<dyn TranscriptionProvider>,
    llm: Arc<dyn CompletionProvider>,
    tts: Arc<dyn SpeechProvider>,
}

impl VoiceAssistant {
    /// Compose a pipeline from the three providers
    #[must_use]
    pub fn new(
        stt: Arc<dyn TranscriptionProvider>,
        llm: Arc<dyn CompletionProvider>,
        tts: Arc<dyn SpeechProvider>,
    ) -> Self {
        Self { stt, llm, tts }
    }

    /// Run a full interaction for the given utterance audio.
    ///
    /// Transcription and completion run to completion before this returns,
    /// so any stage failure surfaces here, before the caller commits to a
    /// streaming response. The returned receiver yields synthesized audio
    /// chunks in order; dropping it cancels synthesis upstream.
    ///
    /// # Errors
    ///
    /// Returns error if transcription, completion or synthesis start fails
    pub async fn assist(&self, audio: Vec<u8>) -> Result<mpsc::Receiver<Bytes>> {
        let transcript = self.stt.transcribe(audio).await.map_err(|e| {
            tracing::error!(error = %e, "transcription stage failed");
            e
        })?;

        let reply = self.llm.complete(&transcript).await.map_err(|e| {
            tracing::error!(error = %e, "completion stage failed");
            e
        })?;

        let mut speech = self.tts.synthesize(&reply).await.map_err(|e| {
            tracing::error!(error = %e, "synthesis stage failed");
            e
        })?;

        let (tx, rx) = mpsc::channel(FORWARD_CAPACITY);

        tokio::spawn(async move {
            while let Some(chunk) = speech.recv().await {
                if tx.send(chunk).await.is_err() {
                    // Consumer went away; dropping `speech` cancels the
                    // producer within its next send.
                    tracing::debug!("assistant output cancelled");
                    return;
                }
            }
            tracing::debug!("assistant output complete");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::providers::{CompletionProvider, SpeechProvider, TranscriptionProvider};
    use crate::Error;

    struct FixedStt;

    #[async_trait]
    impl TranscriptionProvider for FixedStt {
        async fn transcribe(&self, _audio: Vec<u8>) -> Result<String> {
            Ok("what time is it".to_string())
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl CompletionProvider for EchoLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            Ok(format!("you said: {prompt}"))
        }
    }

    /// TTS mock emitting fixed chunks, counting how many were accepted
    struct ChunkedTts {
        chunks: Vec<Bytes>,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpeechProvider for ChunkedTts {
        async fn synthesize(&self, _text: &str) -> Result<mpsc::Receiver<Bytes>> {
            let (tx, rx) = mpsc::channel(1);
            let chunks = self.chunks.clone();
            let sent = Arc::clone(&self.sent);

            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    sent.fetch_add(1, Ordering::SeqCst);
                }
            });

            Ok(rx)
        }
    }

    struct FailingStt;

    #[async_trait]
    impl TranscriptionProvider for FailingStt {
        async fn transcribe(&self, _audio: Vec<u8>) -> Result<String> {
            Err(Error::Stt("no speech".to_string()))
        }
    }

    fn assistant_with_chunks(chunks: Vec<Bytes>, sent: Arc<AtomicUsize>) -> VoiceAssistant {
        VoiceAssistant::new(
            Arc::new(FixedStt),
            Arc::new(EchoLlm),
            Arc::new(ChunkedTts { chunks, sent }),
        )
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let chunks: Vec<Bytes> = (0u8..5).map(|i| Bytes::from(vec![i; 64])).collect();
        let assistant = assistant_with_chunks(chunks.clone(), Arc::new(AtomicUsize::new(0)));

        let mut rx = assistant.assist(vec![0; 16]).await.unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }

        assert_eq!(received, chunks);
    }

    #[tokio::test]
    async fn test_stage_failure_surfaces_before_stream() {
        let assistant = VoiceAssistant::new(
            Arc::new(FailingStt),
            Arc::new(EchoLlm),
            Arc::new(ChunkedTts {
                chunks: vec![Bytes::from_static(b"x")],
                sent: Arc::new(AtomicUsize::new(0)),
            }),
        );

        assert!(matches!(
            assistant.assist(vec![0; 16]).await,
            Err(Error::Stt(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_receiver_cancels_producer() {
        let sent = Arc::new(AtomicUsize::new(0));
        let chunks: Vec<Bytes> = (0u8..100).map(|i| Bytes::from(vec![i; 8])).collect();
        let assistant = assistant_with_chunks(chunks, Arc::clone(&sent));

        let mut rx = assistant.assist(vec![0; 16]).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first[0], 0);
        drop(rx);

        // Give the producer time to observe the closed channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Producer must stop far short of the 100 queued chunks: the
        // forwarder and TTS channels buffer at most a few in flight.
        assert!(sent.load(Ordering::SeqCst) < 10);
    }
}
