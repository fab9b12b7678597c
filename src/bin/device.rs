use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lark::daemon::RECORD_DURATION;
use lark::voice::{EnergyWakeListener, MicRecorder, StreamPlayer};
use lark::{pki, BackendClient, Daemon};

const KEY_FILE: &str = "device.key";
const CERT_FILE: &str = "device.crt";
const CA_FILE: &str = "ca.crt";

/// Lark device agent - wake, record, ask, play
#[derive(Parser)]
#[command(name = "lark-device", version, about)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "LARK_BACKEND_URL")]
    backend_url: String,

    /// Device identifier (certificate common name)
    #[arg(long, env = "LARK_DEVICE_ID")]
    device_id: String,

    /// Directory holding the device key and certificates
    #[arg(long, env = "LARK_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interaction loop (default)
    Run {
        /// Utterance length in seconds
        #[arg(long, default_value = "8")]
        record_secs: u64,
    },
    /// Enroll this device and store its signed certificate
    Enroll {
        /// Owning user id
        #[arg(long)]
        user_id: String,

        /// One-time password issued at registration
        #[arg(long)]
        otp: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Some(Command::Enroll { user_id, otp }) => {
            enroll(&cli.backend_url, &cli.device_id, &cli.state_dir, &user_id, &otp).await
        }
        Some(Command::Run { record_secs }) => {
            run_loop(
                &cli.backend_url,
                &cli.device_id,
                &cli.state_dir,
                Duration::from_secs(record_secs),
            )
            .await
        }
        None => run_loop(&cli.backend_url, &cli.device_id, &cli.state_dir, RECORD_DURATION).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Generate a key and CSR, exchange them with the backend for a signed
/// certificate, and persist the credentials.
async fn enroll(
    backend_url: &str,
    device_id: &str,
    state_dir: &Path,
    user_id: &str,
    otp: &str,
) -> lark::Result<()> {
    std::fs::create_dir_all(state_dir)?;

    let generated = pki::generate_device_csr(device_id)?;
    let client = BackendClient::new(backend_url, device_id)?;

    let signed = client.enroll(user_id, otp, &generated.csr_pem).await?;

    std::fs::write(state_dir.join(KEY_FILE), &generated.key_pem)?;
    std::fs::write(state_dir.join(CERT_FILE), &signed.crt)?;
    std::fs::write(state_dir.join(CA_FILE), &signed.ca)?;

    println!("Device enrolled.");
    println!("  key:  {}", state_dir.join(KEY_FILE).display());
    println!("  cert: {}", state_dir.join(CERT_FILE).display());
    println!("  ca:   {}", state_dir.join(CA_FILE).display());

    Ok(())
}

/// Run the wake -> record -> upload -> play loop until interrupted
async fn run_loop(
    backend_url: &str,
    device_id: &str,
    state_dir: &Path,
    record_duration: Duration,
) -> lark::Result<()> {
    let client = build_client(backend_url, device_id, state_dir)?;

    let stop = Arc::new(AtomicBool::new(false));
    let daemon = Daemon::new(
        EnergyWakeListener::new(Arc::clone(&stop)),
        MicRecorder::new(Arc::clone(&stop)),
        StreamPlayer::new(Arc::clone(&stop)),
        client,
        record_duration,
        stop,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(backend_url, device_id, "device agent ready");
    daemon.run(shutdown_rx).await
}

/// Present the device certificate when it is available; enrollment itself
/// runs without one.
fn build_client(
    backend_url: &str,
    device_id: &str,
    state_dir: &Path,
) -> lark::Result<BackendClient> {
    let key_path = state_dir.join(KEY_FILE);
    let cert_path = state_dir.join(CERT_FILE);

    if key_path.exists() && cert_path.exists() {
        let mut identity = std::fs::read(&key_path)?;
        identity.extend(std::fs::read(&cert_path)?);
        tracing::debug!(cert = %cert_path.display(), "using device identity");
        return BackendClient::with_identity(backend_url, device_id, &identity);
    }

    tracing::warn!("no device certificate found, connecting without client identity");
    BackendClient::new(backend_url, device_id)
}
