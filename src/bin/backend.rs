use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lark::api::{self, ApiState};
use lark::auth::{DeviceCertAuth, JwtAuth};
use lark::db::{self, DeviceRepo, UserRepo};
use lark::providers::{Completion, SpeechToText, TextToSpeech};
use lark::{CertSigner, Config, DeviceService, HttpCaSigner, VoiceAssistant};

/// Lark backend - voice assistant API and device management
#[derive(Parser)]
#[command(name = "lark-backend", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
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

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> lark::Result<()> {
    tracing::info!(version = lark::VERSION, "starting lark backend");

    let config = Config::from_env()?;

    let pool = db::init(&config.database_path)?;
    let user_repo = UserRepo::new(pool.clone());
    let device_repo = DeviceRepo::new(pool);

    let signer: Arc<dyn CertSigner> = Arc::new(HttpCaSigner::new(config.ca.clone())?);
    let devices = DeviceService::new(user_repo.clone(), device_repo, signer);

    let stt = Arc::new(SpeechToText::new(&config.provider)?);
    let llm = Arc::new(Completion::new(&config.provider)?);
    let tts = Arc::new(TextToSpeech::new(&config.provider)?);
    let assistant = Arc::new(VoiceAssistant::new(stt, llm, tts));

    let state = Arc::new(ApiState {
        user_repo,
        devices,
        assistant,
        jwt: JwtAuth::new(&config.jwt_secret),
        cert_auth: DeviceCertAuth::new(&config.cert_header),
        oauth: config.oauth.clone(),
        http: reqwest::Client::new(),
    });

    let mut app = api::router(state);
    if !config.allowed_origins.is_empty() {
        app = app.layer(api::cors_layer(&config.allowed_origins));
        tracing::info!(origins = ?config.allowed_origins, "CORS enabled");
    }

    api::serve(&config.server_addr, app).await?;

    tracing::info!("lark backend finished");
    Ok(())
}
