//! werwolf-core – Gemeinsame Typen und Fehlertypen
//!
//! Bausteine, die von Protokoll, Audio-Engine, Transport und Client
//! gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, WerwolfError};
pub use types::{SessionId, SpeakerId};
