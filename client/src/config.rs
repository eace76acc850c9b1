//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Client laeuft also auch ohne Konfigurationsdatei.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use werwolf_audio::{CaptureConfig, PlaybackConfig};
use werwolf_core::SessionId;
use werwolf_transport::TransportConfig;

/// Umgebungsvariable mit dem Pfad zur Konfigurationsdatei
pub const ENV_CONFIG: &str = "WERWOLF_CONFIG";
pub const STANDARD_PFAD: &str = "werwolf.toml";

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub verbindung: VerbindungsEinstellungen,
    /// Mikrofon-Aufnahme
    pub aufnahme: AufnahmeEinstellungen,
    /// Wiedergabe der Sprecher
    pub wiedergabe: WiedergabeEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Verbindung zum Spielserver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// ws:// oder wss:// Endpunkt des Voice-Kanals
    pub url: String,
    pub session_id: Option<String>,
    /// Abstand zwischen zwei Latenz-Pings
    pub ping_intervall_ms: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/voice".into(),
            session_id: None,
            ping_intervall_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AufnahmeEinstellungen {
    pub sample_rate: u32,
    /// Frame-Groesse in Samples
    pub buffer_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
    /// Name oder Namensteil des Mikrofons (leer = Standardgeraet)
    pub eingabegeraet: Option<String>,
}

impl Default for AufnahmeEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_size: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
            eingabegeraet: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    pub sample_rate: u32,
    /// Obergrenze der Wiedergabe-Queue in Sekunden
    pub max_queue_sek: f64,
    pub ausgabegeraet: Option<String>,
}

impl Default for WiedergabeEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            max_queue_sek: 30.0,
            ausgabegeraet: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Pfad aus `WERWOLF_CONFIG`, sonst `werwolf.toml`
    pub fn pfad_aus_umgebung() -> String {
        std::env::var(ENV_CONFIG).unwrap_or_else(|_| STANDARD_PFAD.into())
    }

    pub fn capture_config(&self) -> CaptureConfig {
        let a = &self.aufnahme;
        CaptureConfig {
            sample_rate: a.sample_rate,
            buffer_size: a.buffer_size,
            echo_cancellation: a.echo_cancellation,
            noise_suppression: a.noise_suppression,
            auto_gain: a.auto_gain,
            device_name: a.eingabegeraet.clone(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.wiedergabe.sample_rate,
            max_queue_duration: self.wiedergabe.max_queue_sek,
            device_name: self.wiedergabe.ausgabegeraet.clone(),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let v = &self.verbindung;
        TransportConfig {
            url: v.url.clone(),
            session_id: v
                .session_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(SessionId::new),
            ping_interval: Duration::from_millis(v.ping_intervall_ms.max(1)),
            ..TransportConfig::default()
        }
    }
}
