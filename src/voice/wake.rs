//! Wake detection
//!
//! An energy-based detector: sustained speech energy followed by a short
//! silence counts as the wake phrase being spoken. The state machine is
//! pure ([`WakeEngine`]) so it can run against synthetic samples; the
//! listener wraps it around a live capture stream and yields exactly one
//! event per detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::{Error, Result};

/// Minimum audio energy to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum accumulated speech before a trigger is possible, in seconds
const MIN_SPEECH_SECS: f32 = 0.3;

/// Trailing silence that completes a trigger, in seconds
const SILENCE_SECS: f32 = 0.5;

/// How often the listener drains the capture buffer
const LISTEN_POLL: Duration = Duration::from_millis(100);

/// State of the wake detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Pure wake-detection state machine over PCM samples
pub struct WakeEngine {
    state: DetectorState,
    sample_rate: u32,
    speech_samples: usize,
    silence_samples: usize,
}

impl WakeEngine {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: DetectorState::Idle,
            sample_rate,
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Feed a block of samples. Returns true exactly when a wake event
    /// completes; the engine resets itself on that boundary.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        let min_speech = (self.sample_rate as f32 * MIN_SPEECH_SECS) as usize;
        let silence = (self.sample_rate as f32 * SILENCE_SECS) as usize;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_samples = samples.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            DetectorState::Listening => {
                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += samples.len();
                }

                if self.silence_samples > silence && self.speech_samples > min_speech {
                    tracing::debug!(speech_samples = self.speech_samples, "wake event");
                    self.reset();
                    return true;
                }

                // Too much silence without enough speech: give up
                if self.silence_samples > silence * 2 {
                    tracing::trace!("wake timeout, resetting");
                    self.reset();
                }
            }
        }

        false
    }

    /// Reset to idle
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Blocks on the microphone until the wake phrase is heard
pub struct EnergyWakeListener {
    stop: Arc<AtomicBool>,
}

impl EnergyWakeListener {
    /// `stop` aborts a blocked listen when set
    #[must_use]
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }

    fn listen_blocking(stop: &AtomicBool) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::WakeWord("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::WakeWord(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let config = supported.config();

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let err_fn = |err| tracing::error!(error = %err, "wake capture error");

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(data);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::WakeWord(e.to_string()))?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend(data.iter().map(|&s| f32::from(s) / 32768.0));
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::WakeWord(e.to_string()))?,
            other => {
                return Err(Error::WakeWord(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };

        stream.play().map_err(|e| Error::WakeWord(e.to_string()))?;
        tracing::debug!(sample_rate, "listening for wake phrase");

        let mut engine = WakeEngine::new(sample_rate);

        loop {
            if stop.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            std::thread::sleep(LISTEN_POLL);

            let samples = buffer
                .lock()
                .map(|mut buf| std::mem::take(&mut *buf))
                .unwrap_or_default();

            if !samples.is_empty() && engine.process(&samples) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl crate::daemon::WakeListener for EnergyWakeListener {
    async fn listen(&self) -> Result<()> {
        let stop = Arc::clone(&self.stop);
        tokio::task::spawn_blocking(move || EnergyWakeListener::listen_blocking(&stop))
            .await
            .map_err(|e| Error::WakeWord(format!("listen task failed: {e}")))?
    }
}
