//! Lark - Streaming voice assistant backend and on-device agent
//!
//! This library provides both halves of the lark system:
//! - The backend: HTTP API, user/device management, device enrollment
//!   against an external CA, and the streaming STT -> LLM -> TTS pipeline
//! - The device agent: wake-word triggered record/upload/playback loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Device agent                       │
//! │   Wake  │  Record  │  Upload  │  Playback            │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ mTLS (terminated by front proxy)
//! ┌────────────────────▼─────────────────────────────────┐
//! │                   Lark backend                        │
//! │   Auth  │  Devices  │  Enrollment  │  Assistant      │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │        Providers (STT / LLM / TTS)  │  CA            │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod assistant;
pub mod auth;
pub mod ca;
pub mod client;
pub mod config;
pub mod daemon;
pub mod db;
pub mod devices;
pub mod error;
pub mod pki;
pub mod providers;
pub mod tools;
pub mod voice;

pub use assistant::VoiceAssistant;
pub use ca::{CertSignRequest, CertSignResult, CertSigner, HttpCaSigner};
pub use client::BackendClient;
pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use devices::DeviceService;
pub use error::{Error, Result};
pub use tools::{Tool, ToolRegistry, ToolRegistryBuilder};

/// Crate version reported by the version endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
