//! Fehlertypen fuer Werwolf Voice
//!
//! Zentraler Fehler-Enum auf Session-Ebene. Die Crates fuer Audio und
//! Transport definieren eigene Fehler und konvertieren via `From`.

use thiserror::Error;

/// Globaler Result-Alias
pub type Result<T> = std::result::Result<T, WerwolfError>;

/// Alle Fehlerklassen des Voice-Subsystems
///
/// Keiner dieser Fehler ist fatal fuer den Host-Prozess: jeder Zustand
/// laesst sich durch erneutes Anfordern, Neustarten oder Neuverbinden
/// verlassen.
#[derive(Debug, Error)]
pub enum WerwolfError {
    // --- Mikrofon ---
    #[error("Mikrofon-Berechtigung verweigert: {0}")]
    Berechtigung(String),

    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl WerwolfError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Versuch durch den Aufrufer sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Berechtigung(_) | Self::Audio(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = WerwolfError::Berechtigung("NotAllowedError".into());
        assert_eq!(
            e.to_string(),
            "Mikrofon-Berechtigung verweigert: NotAllowedError"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(WerwolfError::Verbindung("test".into()).ist_wiederholbar());
        assert!(WerwolfError::Berechtigung("test".into()).ist_wiederholbar());
        assert!(!WerwolfError::Konfiguration("test".into()).ist_wiederholbar());
        assert!(!WerwolfError::intern("x").ist_wiederholbar());
    }
}
