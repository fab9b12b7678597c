//! Device-side audio
//!
//! Handles:
//! - Fixed-duration microphone capture
//! - RIFF/WAVE serialization
//! - Energy-based wake detection
//! - Streamed MPEG playback to the speaker

mod capture;
mod playback;
mod wake;

pub use capture::{samples_to_wav, MicRecorder, Recording};
pub use playback::StreamPlayer;
pub use wake::{DetectorState, EnergyWakeListener, WakeEngine};
