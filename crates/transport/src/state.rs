//! Verbindungszustand
//!
//! ## State Machine
//! ```text
//! Disconnected -> Connecting -> Connected -> Error
//!      ^              |             |
//!      |              v             v
//!      +------------ Error    Disconnected (Close 1000)
//! ```
//!
//! Jedes `connect()` ersetzt den gesamten Zustand; nichts wird aus einer
//! frueheren Verbindung uebernommen.

use serde::Serialize;
use werwolf_protocol::control::{GameState, SpeakerTurn, TranscriptEvent};

use crate::error::{TransportError, TransportResult};

/// Status der Verbindung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn ist_offen(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Read-only Momentaufnahme fuer den Konsumenten
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    /// Letzte gemessene Round-Trip-Zeit
    pub latency_ms: Option<u64>,
    /// Letzter `speaker_turn`
    pub current_speaker: Option<SpeakerTurn>,
    pub game_state: Option<GameState>,
    pub last_transcript: Option<TranscriptEvent>,
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    /// Frischer Zustand fuer einen neuen Verbindungsversuch
    pub fn connecting() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            ..Default::default()
        }
    }

    /// Anzeigename des aktuellen Sprechers (Label fuer eingehendes Audio)
    pub fn speaker_name(&self) -> Option<String> {
        self.current_speaker
            .as_ref()
            .map(|turn| turn.speaker_name.clone())
    }
}

/// Haengt die Session-ID als Query-Parameter `session_id` an
pub fn build_url(url: &str, session_id: Option<&str>) -> TransportResult<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| TransportError::UngueltigeUrl(url.to_string()))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(TransportError::UngueltigeUrl(url.to_string()));
    }

    let Some(session_id) = session_id else {
        return Ok(url.to_string());
    };

    let (basis, fragment) = match url.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (url, None),
    };
    let trenner = if !basis.contains('?') {
        "?"
    } else if basis.ends_with('?') || basis.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut ergebnis = format!("{}{}session_id={}", basis, trenner, encode_query(session_id));
    if let Some(fragment) = fragment {
        ergebnis.push('#');
        ergebnis.push_str(fragment);
    }
    Ok(ergebnis)
}

/// Prozent-Kodierung fuer Query-Werte (RFC 3986, unreserved bleibt)
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
