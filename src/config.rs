//! Environment-driven configuration for the lark backend

use std::path::PathBuf;

use crate::{Error, Result};

/// Backend configuration, populated from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP server (`SERVER_ADDR`)
    pub server_addr: String,

    /// Log level string, e.g. "info" (`LOG_LEVEL`)
    pub log_level: String,

    /// Symmetric secret for signing user JWTs (`JWT_SECRET`)
    pub jwt_secret: String,

    /// Name of the header carrying the forwarded device certificate
    /// (`CERT_HEADER`, defaults to the Traefik passtls header)
    pub cert_header: String,

    /// Comma-separated allowed CORS origins; empty disables the CORS layer
    /// (`ALLOWED_ORIGINS`)
    pub allowed_origins: Vec<String>,

    /// Path to the SQLite database file (`DATABASE_PATH`)
    pub database_path: PathBuf,

    /// OAuth2 settings for the external identity provider
    pub oauth: Option<OAuthConfig>,

    /// AI provider settings (STT, LLM, TTS)
    pub provider: ProviderConfig,

    /// Certificate authority settings for device enrollment
    pub ca: CaConfig,
}

/// Google OAuth2 client configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth2 client id (`GOOGLE_CLIENT_ID`)
    pub client_id: String,

    /// OAuth2 client secret (`GOOGLE_CLIENT_SECRET`)
    pub client_secret: String,

    /// Redirect URL registered with the provider (`GOOGLE_CLIENT_REDIRECT`)
    pub redirect_url: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider API base URL (`OPENAI_API_URL`)
    pub api_url: String,

    /// Provider API key (`OPENAI_API_KEY`)
    pub api_key: String,

    /// STT model identifier (`STT_MODEL`)
    pub stt_model: String,

    /// Chat completion model identifier (`LLM_MODEL`)
    pub llm_model: String,

    /// TTS model identifier (`TTS_MODEL`)
    pub tts_model: String,

    /// TTS voice identifier (`TTS_VOICE`)
    pub tts_voice: String,

    /// Assistant persona injected as the system message (`ASSISTANT_PERSONA`)
    pub persona: String,
}

/// Certificate authority configuration for CSR signing
#[derive(Debug, Clone)]
pub struct CaConfig {
    /// Base URL of the CA (`CA_URL`)
    pub url: String,

    /// Provisioner name, used as the token issuer (`CA_PROVISIONER_NAME`)
    pub provisioner_name: String,

    /// Provisioner password (`CA_PROVISIONER_PASSWORD`)
    pub provisioner_password: String,

    /// PEM trust root of the CA (`CA_ROOT_PEM`)
    pub root_pem: String,

    /// PEM-encoded EC private key used to sign one-time tokens
    /// (`CA_PROVISIONER_KEY`)
    pub provisioner_key_pem: String,

    /// Key id placed in the token header (`CA_PROVISIONER_KID`)
    pub key_id: Option<String>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn required(name: &str) -> Result<String> {
    var(name).ok_or_else(|| Error::Config(format!("{name} must be set")))
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing
    pub fn from_env() -> Result<Self> {
        let oauth = match (
            var("GOOGLE_CLIENT_ID"),
            var("GOOGLE_CLIENT_SECRET"),
            var("GOOGLE_CLIENT_REDIRECT"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_url)) => Some(OAuthConfig {
                client_id,
                client_secret,
                redirect_url,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Config(
                    "GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_CLIENT_REDIRECT \
                     must be set together"
                        .to_string(),
                ));
            }
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            server_addr: var_or("SERVER_ADDR", "0.0.0.0:8080"),
            log_level: var_or("LOG_LEVEL", "info"),
            jwt_secret: required("JWT_SECRET")?,
            cert_header: var_or("CERT_HEADER", "X-Forwarded-Tls-Client-Cert"),
            allowed_origins,
            database_path: PathBuf::from(var_or("DATABASE_PATH", "lark.db")),
            oauth,
            provider: ProviderConfig {
                api_url: var_or("OPENAI_API_URL", "https://api.openai.com/v1"),
                api_key: required("OPENAI_API_KEY")?,
                stt_model: var_or("STT_MODEL", "gpt-4o-mini-transcribe"),
                llm_model: var_or("LLM_MODEL", "gpt-4o-mini"),
                tts_model: var_or("TTS_MODEL", "gpt-4o-mini-tts"),
                tts_voice: var_or("TTS_VOICE", "shimmer"),
                persona: var_or("ASSISTANT_PERSONA", "You are a voice assistant named Lark"),
            },
            ca: CaConfig {
                url: required("CA_URL")?,
                provisioner_name: required("CA_PROVISIONER_NAME")?,
                provisioner_password: var_or("CA_PROVISIONER_PASSWORD", ""),
                root_pem: var_or("CA_ROOT_PEM", ""),
                provisioner_key_pem: required("CA_PROVISIONER_KEY")?,
                key_id: var("CA_PROVISIONER_KID"),
            },
        })
    }
}
