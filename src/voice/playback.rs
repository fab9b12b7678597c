//! Streamed audio playback
//!
//! Consumes MPEG chunks as they arrive from the backend, decodes them
//! frame by frame and drives the default output device. The decode loop
//! paces itself against a bounded sample queue, so backpressure reaches
//! the HTTP body through the chunk channel.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Upper bound on buffered decoded audio, in seconds
const MAX_BUFFERED_SECS: u32 = 1;

/// Poll interval for queue watermarks
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Feeds streamed chunks into the MP3 decoder as a continuous byte source.
/// Returns EOF once the sending side closes.
struct ChunkReader {
    rx: std_mpsc::Receiver<Bytes>,
    current: Bytes,
    pos: usize,
}

impl ChunkReader {
    fn new(rx: std_mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Downmix an interleaved MP3 frame to mono f32
fn frame_to_mono(data: &[i16], channels: usize) -> Vec<f32> {
    if channels == 2 {
        data.chunks(2)
            .map(|chunk| {
                let left = f32::from(chunk[0]) / 32768.0;
                let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                (left + right) / 2.0
            })
            .collect()
    } else {
        data.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}

/// Plays streamed MPEG audio on the default output device
pub struct StreamPlayer {
    stop: Arc<AtomicBool>,
}

impl StreamPlayer {
    /// `stop` aborts in-flight playback when set; partially decoded audio
    /// is discarded.
    #[must_use]
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }

    fn play_blocking(stop: &AtomicBool, rx: std_mpsc::Receiver<Bytes>) -> Result<()> {
        let mut decoder = minimp3::Decoder::new(ChunkReader::new(rx));

        // The first frame fixes the stream's sample rate
        let first = match decoder.next_frame() {
            Ok(frame) => frame,
            Err(minimp3::Error::Eof) => return Ok(()),
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        };
        #[allow(clippy::cast_sign_loss)]
        let sample_rate = first.sample_rate as u32;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "streaming playback started"
        );

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let source = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = source.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let max_buffered = (sample_rate * MAX_BUFFERED_SECS) as usize;

        let push = |frame: minimp3::Frame| {
            let samples = frame_to_mono(&frame.data, frame.channels);
            if let Ok(mut queue) = queue.lock() {
                queue.extend(samples);
            }
        };

        push(first);

        loop {
            if stop.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }

            // Pace decoding against playback
            while queue.lock().map(|q| q.len()).unwrap_or(0) > max_buffered {
                if stop.load(Ordering::Relaxed) {
                    return Err(Error::Cancelled);
                }
                std::thread::sleep(DRAIN_POLL);
            }

            match decoder.next_frame() {
                Ok(frame) => push(frame),
                Err(minimp3::Error::Eof) => break,
                Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
            }
        }

        // Let the queue drain before tearing the stream down
        while queue.lock().map(|q| !q.is_empty()).unwrap_or(false) {
            if stop.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            std::thread::sleep(DRAIN_POLL);
        }
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!("streaming playback complete");
        Ok(())
    }
}

#[async_trait]
impl crate::daemon::Player for StreamPlayer {
    async fn play(&self, mut chunks: mpsc::Receiver<Bytes>) -> Result<()> {
        let (tx, rx) = std_mpsc::sync_channel::<Bytes>(1);

        // Bridge the async chunk stream onto the blocking decoder thread
        let forward = tokio::task::spawn_blocking(move || {
            while let Some(chunk) = chunks.blocking_recv() {
                if tx.send(chunk).is_err() {
                    break;
                }
            }
        });

        let stop = Arc::clone(&self.stop);
        let result = tokio::task::spawn_blocking(move || Self::play_blocking(&stop, rx))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?;

        let _ = forward.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_reader_concatenates_chunks() {
        let (tx, rx) = std_mpsc::sync_channel(4);
        tx.send(Bytes::from_static(b"hello ")).unwrap();
        tx.send(Bytes::from_static(b"world")).unwrap();
        drop(tx);

        let mut reader = ChunkReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_chunk_reader_eof_on_close() {
        let (tx, rx) = std_mpsc::sync_channel::<Bytes>(1);
        drop(tx);

        let mut reader = ChunkReader::new(rx);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_chunk_reader_partial_reads() {
        let (tx, rx) = std_mpsc::sync_channel(1);
        tx.send(Bytes::from_static(b"abcdef")).unwrap();
        drop(tx);

        let mut reader = ChunkReader::new(rx);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_frame_to_mono_stereo_average() {
        let data = vec![16384i16, -16384, 8192, 8192];
        let mono = frame_to_mono(&data, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.0).abs() < 0.001);
        assert!((mono[1] - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_frame_to_mono_passthrough() {
        let data = vec![32767i16, -32768];
        let mono = frame_to_mono(&data, 1);
        assert!((mono[0] - 0.99997).abs() < 0.001);
        assert!((mono[1] + 1.0).abs() < 0.001);
    }
}
