//! Control-Protokoll (JSON-Text-Frames)
//!
//! Alle Steuerungsnachrichten zwischen Dashboard-Client und Spielserver.
//!
//! ## Design
//! - Ein einziges getaggtes Enum, Tag ist das JSON-Feld `type`
//! - Exhaustives `match` statt String-Vergleich beim Dispatch
//! - Nachrichten ohne Nutzdaten (`ping`, `pong`, ...) sind leere
//!   Struct-Varianten, damit zusaetzliche Felder des Servers ignoriert werden

use serde::{Deserialize, Serialize};
use werwolf_core::types::SpeakerId;

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Kuendigt an, wer als naechstes spricht.
///
/// Die darauf folgenden Binaer-Frames tragen keine eigene Identitaet und
/// werden diesem Sprecher zugeordnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub speaker_id: SpeakerId,
    /// Anzeigename, wird als Sprecher-Label an die Wiedergabe uebergeben
    pub speaker_name: String,
    pub priority: i32,
    /// Ob der Mensch diesen Sprecher unterbrechen darf
    pub can_interrupt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

/// Transkript eines Redebeitrags (unabhaengig von der Audio-Wiedergabe)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub speaker_id: SpeakerId,
    pub speaker_name: String,
    pub text: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Aktueller Spielzustand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub day: u32,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substate: Option<String>,
    #[serde(default)]
    pub alive_players: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<u64>,
}

/// Phasenwechsel (z.B. Diskussion -> Abstimmung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePhaseChange {
    pub previous_phase: String,
    pub new_phase: String,
    pub day: u32,
}

/// Vom Server gemeldeter Fehler. Die Verbindung bleibt bestehen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Der Mensch uebersteuert die geplante Absicht seines Spielers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentOverride {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: ControlMessage
// ---------------------------------------------------------------------------

/// Alle Control-Nachrichten des Voice-Kanals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    // Keepalive (beide Richtungen)
    Ping {},
    Pong {},

    // Server -> Client
    SpeakerTurn(SpeakerTurn),
    Transcript(TranscriptEvent),
    GameState(GameState),
    PhaseChange(GamePhaseChange),
    Error(ServerError),

    // Client -> Server
    HumanReady {},
    IntentOverride(IntentOverride),
    SkipSpeaker {},
}

impl ControlMessage {
    pub fn ping() -> Self {
        Self::Ping {}
    }

    pub fn pong() -> Self {
        Self::Pong {}
    }

    pub fn human_ready() -> Self {
        Self::HumanReady {}
    }

    pub fn skip_speaker() -> Self {
        Self::SkipSpeaker {}
    }

    pub fn intent_override(intent: impl Into<String>, target: Option<String>) -> Self {
        Self::IntentOverride(IntentOverride {
            intent: intent.into(),
            target,
        })
    }

    /// Gibt den Wert des `type`-Tags zurueck (fuer Logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ping {} => "ping",
            Self::Pong {} => "pong",
            Self::SpeakerTurn(_) => "speaker_turn",
            Self::Transcript(_) => "transcript",
            Self::GameState(_) => "game_state",
            Self::PhaseChange(_) => "phase_change",
            Self::Error(_) => "error",
            Self::HumanReady {} => "human_ready",
            Self::IntentOverride(_) => "intent_override",
            Self::SkipSpeaker {} => "skip_speaker",
        }
    }

    /// Serialisiert die Nachricht als JSON-String
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus einem JSON-String
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serialisierung() {
        let json = ControlMessage::ping().to_json().unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn pong_mit_zusatzfeldern_wird_akzeptiert() {
        let msg = ControlMessage::from_json(r#"{"type":"pong","timestamp":12345}"#).unwrap();
        assert_eq!(msg, ControlMessage::pong());
    }

    #[test]
    fn speaker_turn_deserialisierung() {
        let json = r#"{
            "type": "speaker_turn",
            "speaker_id": "p2",
            "speaker_name": "Alice",
            "priority": 3,
            "can_interrupt": true,
            "estimated_duration_ms": 4200
        }"#;
        match ControlMessage::from_json(json).unwrap() {
            ControlMessage::SpeakerTurn(turn) => {
                assert_eq!(turn.speaker_id.as_str(), "p2");
                assert_eq!(turn.speaker_name, "Alice");
                assert_eq!(turn.priority, 3);
                assert!(turn.can_interrupt);
                assert_eq!(turn.estimated_duration_ms, Some(4200));
            }
            other => panic!("Erwartet SpeakerTurn, erhalten: {:?}", other),
        }
    }

    #[test]
    fn speaker_turn_ohne_dauer() {
        let json = r#"{"type":"speaker_turn","speaker_id":"p1","speaker_name":"Bob","priority":0,"can_interrupt":false}"#;
        let msg = ControlMessage::from_json(json).unwrap();
        assert!(matches!(
            msg,
            ControlMessage::SpeakerTurn(SpeakerTurn {
                estimated_duration_ms: None,
                ..
            })
        ));
    }

    #[test]
    fn game_state_deserialisierung() {
        let json = r#"{
            "type": "game_state",
            "day": 2,
            "phase": "discussion",
            "alive_players": ["Alice", "Bob", "Carol"],
            "current_speaker": "Bob",
            "time_remaining_ms": 30000
        }"#;
        let ControlMessage::GameState(state) = ControlMessage::from_json(json).unwrap() else {
            panic!("Erwartet GameState");
        };
        assert_eq!(state.day, 2);
        assert_eq!(state.phase, "discussion");
        assert_eq!(state.substate, None);
        assert_eq!(state.alive_players.len(), 3);
        assert_eq!(state.current_speaker.as_deref(), Some("Bob"));
    }

    #[test]
    fn transcript_und_phase_change() {
        let t = r#"{"type":"transcript","speaker_id":"p1","speaker_name":"Bob","text":"Ich bin Dorfbewohner","is_final":true,"confidence":0.93}"#;
        let ControlMessage::Transcript(ev) = ControlMessage::from_json(t).unwrap() else {
            panic!("Erwartet Transcript");
        };
        assert!(ev.is_final);
        assert!((ev.confidence.unwrap() - 0.93).abs() < 1e-6);

        let p = r#"{"type":"phase_change","previous_phase":"discussion","new_phase":"voting","day":1}"#;
        let ControlMessage::PhaseChange(pc) = ControlMessage::from_json(p).unwrap() else {
            panic!("Erwartet PhaseChange");
        };
        assert_eq!(pc.new_phase, "voting");
    }

    #[test]
    fn server_error_deserialisierung() {
        let json = r#"{"type":"error","code":"NOT_YOUR_TURN","message":"Warte auf deinen Zug"}"#;
        let msg = ControlMessage::from_json(json).unwrap();
        assert_eq!(msg.type_name(), "error");
    }

    #[test]
    fn intent_override_serialisierung() {
        let msg = ControlMessage::intent_override("accuse", Some("Alice".into()));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "intent_override");
        assert_eq!(value["intent"], "accuse");
        assert_eq!(value["target"], "Alice");

        let ohne_ziel = ControlMessage::intent_override("pass", None).to_json().unwrap();
        assert!(!ohne_ziel.contains("target"));
    }

    #[test]
    fn client_nachrichten_ohne_nutzdaten() {
        assert_eq!(
            ControlMessage::human_ready().to_json().unwrap(),
            r#"{"type":"human_ready"}"#
        );
        assert_eq!(
            ControlMessage::skip_speaker().to_json().unwrap(),
            r#"{"type":"skip_speaker"}"#
        );
    }

    #[test]
    fn unbekannter_typ_ist_fehler() {
        assert!(ControlMessage::from_json(r#"{"type":"vote_cast","target":"x"}"#).is_err());
        assert!(ControlMessage::from_json("kein json").is_err());
    }
}
