//! Fehlertypen fuer die Audio-Engine

use thiserror::Error;
use werwolf_core::WerwolfError;

/// Alle moeglichen Fehler der Audio-Engine
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Keine Mikrofon-Berechtigung (request_permission zuerst aufrufen)")]
    KeineBerechtigung,

    #[error("Mikrofon-Zugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Dekodier-Fehler: {0}")]
    DekodierFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for WerwolfError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::KeineBerechtigung | AudioError::ZugriffVerweigert(_) => {
                WerwolfError::Berechtigung(e.to_string())
            }
            AudioError::Konfiguration(msg) => WerwolfError::Konfiguration(msg),
            other => WerwolfError::Audio(other.to_string()),
        }
    }
}
