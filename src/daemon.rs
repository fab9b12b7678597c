//! On-device interaction loop
//!
//! Four cooperating stages connected by bounded single-slot channels:
//! wake -> record -> upload -> play. A gate token travels back from the
//! playback stage to the wake stage, so a new wake event is only accepted
//! once the previous interaction has fully terminated. Shutdown (or a fatal
//! stage error) flips a shared watch channel that every stage selects on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::voice::Recording;
use crate::{Error, Result};

/// Fixed utterance length captured after each wake event
pub const RECORD_DURATION: Duration = Duration::from_secs(8);

/// Blocks until the wake phrase is heard, yielding one event per call
#[async_trait]
pub trait WakeListener: Send + Sync {
    /// Resolve when the wake phrase is detected
    async fn listen(&self) -> Result<()>;
}

/// Captures a fixed-duration utterance
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Record from the microphone for the given duration
    async fn record(&self, duration: Duration) -> Result<Recording>;
}

/// Plays a streamed audio response
#[async_trait]
pub trait Player: Send + Sync {
    /// Consume the chunk stream and drive the speaker until it ends
    async fn play(&self, chunks: mpsc::Receiver<Bytes>) -> Result<()>;
}

/// Uploads an utterance and streams back the assistant's spoken reply
#[async_trait]
pub trait AssistStream: Send + Sync {
    /// Post the WAV file at `path`, returning the response chunk stream
    async fn assist(&self, path: &Path) -> Result<mpsc::Receiver<Bytes>>;
}

/// The device-side orchestrator
pub struct Daemon<W, R, P, A> {
    wake: Arc<W>,
    recorder: Arc<R>,
    player: Arc<P>,
    assistant: Arc<A>,
    record_duration: Duration,
    stop: Arc<AtomicBool>,
}

impl<W, R, P, A> Daemon<W, R, P, A>
where
    W: WakeListener + 'static,
    R: Recorder + 'static,
    P: Player + 'static,
    A: AssistStream + 'static,
{
    /// Assemble the orchestrator. `stop` is shared with blocking audio
    /// adapters so they observe cancellation mid-frame.
    #[must_use]
    pub fn new(
        wake: W,
        recorder: R,
        player: P,
        assistant: A,
        record_duration: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            wake: Arc::new(wake),
            recorder: Arc::new(recorder),
            player: Arc::new(player),
            assistant: Arc::new(assistant),
            record_duration,
            stop,
        }
    }

    /// Run the interaction loop until `shutdown` fires or a stage fails
    /// with a non-recoverable error.
    ///
    /// # Errors
    ///
    /// Returns the first fatal stage error
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Forward the external shutdown and trip the blocking-stage flag
        {
            let shutdown_tx = shutdown_tx.clone();
            let stop = Arc::clone(&self.stop);
            tokio::spawn(async move {
                if !*shutdown.borrow() {
                    let _ = shutdown.changed().await;
                }
                stop.store(true, Ordering::Relaxed);
                let _ = shutdown_tx.send(true);
            });
        }

        let (gate_tx, gate_rx) = mpsc::channel::<()>(1);
        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let (rec_tx, rec_rx) = mpsc::channel::<PathBuf>(1);
        let (job_tx, job_rx) = mpsc::channel::<mpsc::Receiver<Bytes>>(1);

        // Seed the gate: the first wake needs no prior interaction
        gate_tx
            .send(())
            .await
            .map_err(|_| Error::Config("gate channel closed at startup".to_string()))?;

        let mut stages: JoinSet<Result<()>> = JoinSet::new();
        stages.spawn(wake_stage(
            Arc::clone(&self.wake),
            gate_rx,
            wake_tx,
            shutdown_rx.clone(),
        ));
        stages.spawn(record_stage(
            Arc::clone(&self.recorder),
            self.record_duration,
            wake_rx,
            rec_tx,
            shutdown_rx.clone(),
        ));
        stages.spawn(upload_stage(
            Arc::clone(&self.assistant),
            rec_rx,
            job_tx,
            gate_tx.clone(),
            shutdown_rx.clone(),
        ));
        stages.spawn(play_stage(
            Arc::clone(&self.player),
            job_rx,
            gate_tx,
            shutdown_rx,
        ));

        let mut first_err = None;
        while let Some(joined) = stages.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(Error::Config(format!("stage panicked: {e}"))),
            };

            if let Some(e) = failure {
                tracing::error!(error = %e, "stage failed, shutting down loop");
                if first_err.is_none() {
                    first_err = Some(e);
                }
                self.stop.store(true, Ordering::Relaxed);
                let _ = shutdown_tx.send(true);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Temp file for one utterance, named by a monotonically increasing
/// timestamp
fn utterance_path() -> PathBuf {
    let ts = Utc::now().format("%Y%m%d%H%M%S%3f");
    std::env::temp_dir().join(format!("utterance-{ts}.wav"))
}

async fn remove_utterance(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove utterance file");
    }
}

async fn wake_stage<W: WakeListener>(
    wake: Arc<W>,
    mut gate_rx: mpsc::Receiver<()>,
    wake_tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            gate = gate_rx.recv() => {
                if gate.is_none() {
                    return Ok(());
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            listened = wake.listen() => match listened {
                Ok(()) => tracing::debug!("wake phrase detected"),
                Err(Error::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        if wake_tx.send(()).await.is_err() {
            return Ok(());
        }
    }
}

async fn record_stage<R: Recorder>(
    recorder: Arc<R>,
    duration: Duration,
    mut wake_rx: mpsc::Receiver<()>,
    rec_tx: mpsc::Sender<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            token = wake_rx.recv() => {
                if token.is_none() {
                    return Ok(());
                }
            }
        }

        let recording = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            recorded = recorder.record(duration) => match recorded {
                Ok(recording) => recording,
                Err(Error::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        };

        let wav = recording.to_wav()?;
        let path = utterance_path();
        tokio::fs::write(&path, &wav).await?;
        tracing::debug!(path = %path.display(), bytes = wav.len(), "utterance recorded");

        if rec_tx.send(path).await.is_err() {
            return Ok(());
        }
    }
}

async fn upload_stage<A: AssistStream>(
    assistant: Arc<A>,
    mut rec_rx: mpsc::Receiver<PathBuf>,
    job_tx: mpsc::Sender<mpsc::Receiver<Bytes>>,
    gate_tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let path = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            path = rec_rx.recv() => match path {
                Some(path) => path,
                None => return Ok(()),
            }
        };

        // On shutdown the request future is dropped, closing the in-flight
        // body; the temp file is removed either way.
        let result = tokio::select! {
            _ = shutdown.changed() => None,
            result = assistant.assist(&path) => Some(result),
        };
        remove_utterance(&path).await;
        let Some(result) = result else {
            return Ok(());
        };

        match result {
            Ok(chunks) => {
                if job_tx.send(chunks).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                // Transient backend failure: log and rearm the loop
                tracing::warn!(error = %e, "assist request failed");
                if gate_tx.send(()).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn play_stage<P: Player>(
    player: Arc<P>,
    mut job_rx: mpsc::Receiver<mpsc::Receiver<Bytes>>,
    gate_tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let chunks = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            job = job_rx.recv() => match job {
                Some(chunks) => chunks,
                None => return Ok(()),
            }
        };

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            played = player.play(chunks) => match played {
                Ok(()) => tracing::debug!("playback finished"),
                Err(Error::Cancelled) => return Ok(()),
                // A bad stream is recoverable; the next interaction starts clean
                Err(e) => tracing::warn!(error = %e, "playback failed"),
            }
        }

        if gate_tx.send(()).await.is_err() {
            return Ok(());
        }
    }
}
