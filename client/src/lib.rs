//! werwolf-client – Bibliotheks-Root
//!
//! Konfiguration und Session-Verdrahtung des Voice-Clients. Der
//! Einstiegspunkt liegt in `main.rs`.

pub mod config;
pub mod session;

pub use config::ClientConfig;
pub use session::{SessionZustand, VoiceSession};
