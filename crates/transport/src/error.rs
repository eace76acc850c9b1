//! Fehlertypen fuer den Voice-Transport

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use werwolf_core::WerwolfError;

/// Fehlertyp fuer den Voice-Transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// URL ist kein gueltiger ws:// oder wss:// Endpunkt
    #[error("Ungueltige URL: {0}")]
    UngueltigeUrl(String),

    /// Verbindungsaufbau fehlgeschlagen
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    /// Verbindung wurde nicht mit Status 1000 geschlossen
    #[error("Verbindung abnormal geschlossen: {0}")]
    AbnormalGeschlossen(String),

    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// connect() wurde ausserhalb einer tokio-Runtime aufgerufen
    #[error("Keine tokio-Runtime verfuegbar")]
    KeineRuntime,
}

/// Result-Typ fuer den Voice-Transport
pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for WerwolfError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::UngueltigeUrl(url) => WerwolfError::Konfiguration(url),
            TransportError::Json(e) => WerwolfError::UngueltigeNachricht(e.to_string()),
            TransportError::AbnormalGeschlossen(msg) => WerwolfError::Getrennt(msg),
            TransportError::KeineRuntime => WerwolfError::intern("Keine tokio-Runtime"),
            other => WerwolfError::Verbindung(other.to_string()),
        }
    }
}
