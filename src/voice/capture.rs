//! Microphone capture and WAV serialization

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::{Error, Result};

/// Poll interval while a blocking capture waits out its duration
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// A finished recording: mono PCM at the capture device's native rate
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Recording {
    /// Serialize as a RIFF/WAVE file (16-bit signed LE)
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.channels, self.sample_rate)
    }
}

/// Encode PCM samples as WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], channels: u16, sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Records fixed-duration utterances from the default input device
pub struct MicRecorder {
    stop: Arc<AtomicBool>,
}

impl MicRecorder {
    /// `stop` aborts an in-flight recording when set
    #[must_use]
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }

    /// Capture audio for the given duration. Multi-channel input is
    /// downmixed to mono; the device's default sample rate is kept.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream fails
    pub fn record_blocking(stop: &AtomicBool, duration: Duration) -> Result<Recording> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        let config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "recording utterance"
        );

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let err_fn = |err| tracing::error!(error = %err, "audio capture error");

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
                .map_err(|e| Error::Audio(e.to_string()))?,
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
                .map_err(|e| Error::Audio(e.to_string()))?,
            other => {
                return Err(Error::Audio(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let started = std::time::Instant::now();
        while started.elapsed() < duration {
            if stop.load(Ordering::Relaxed) {
                drop(stream);
                return Err(Error::Cancelled);
            }
            std::thread::sleep(CAPTURE_POLL);
        }

        drop(stream);

        let raw = buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();

        let mono = downmix(&raw, channels);
        let samples: Vec<i16> = mono
            .iter()
            .map(|&s| {
                #[allow(clippy::cast_possible_truncation)]
                let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
                v
            })
            .collect();

        tracing::debug!(samples = samples.len(), "recording finished");

        Ok(Recording {
            samples,
            sample_rate,
            channels: 1,
        })
    }
}

#[async_trait]
impl crate::daemon::Recorder for MicRecorder {
    async fn record(&self, duration: Duration) -> Result<Recording> {
        let stop = Arc::clone(&self.stop);
        tokio::task::spawn_blocking(move || MicRecorder::record_blocking(&stop, duration))
            .await
            .map_err(|e| Error::Audio(format!("recording task failed: {e}")))?
    }
}

/// Average interleaved channels down to mono
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
