//! Dispatch eingehender Nachrichten
//!
//! Binaer-Frames gehen als Audio an die Wiedergabe, getaggt mit dem
//! Sprecher des letzten `speaker_turn`. Text-Frames werden als JSON
//! geparst und per `type` auf Zustand und Callbacks verteilt; ungueltiges
//! JSON wird protokolliert und verworfen.
//!
//! Die Zustandsaenderung passiert unter dem Lock, die Callbacks werden
//! danach ohne Lock zugestellt ([`Notification`]).

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use werwolf_protocol::control::{
    ControlMessage, GamePhaseChange, GameState, ServerError, SpeakerTurn, TranscriptEvent,
};
use werwolf_protocol::wire::WireMessage;

use crate::latency::PingTracker;
use crate::state::{ConnectionSnapshot, ConnectionStatus};

pub type AudioCallback = Arc<dyn Fn(Bytes, Option<String>) + Send + Sync>;
pub type SpeakerTurnCallback = Arc<dyn Fn(SpeakerTurn) + Send + Sync>;
pub type TranscriptCallback = Arc<dyn Fn(TranscriptEvent) + Send + Sync>;
pub type GameStateCallback = Arc<dyn Fn(GameState) + Send + Sync>;
pub type PhaseChangeCallback = Arc<dyn Fn(GamePhaseChange) + Send + Sync>;
pub type ServerErrorCallback = Arc<dyn Fn(ServerError) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Registrierte Callbacks, je Slot genau ein Abonnent
#[derive(Default, Clone)]
pub struct TransportCallbacks {
    pub on_audio: Option<AudioCallback>,
    pub on_speaker_turn: Option<SpeakerTurnCallback>,
    pub on_transcript: Option<TranscriptCallback>,
    pub on_game_state: Option<GameStateCallback>,
    pub on_phase_change: Option<PhaseChangeCallback>,
    pub on_server_error: Option<ServerErrorCallback>,
    pub on_status_change: Option<StatusCallback>,
}

/// Zuzustellende Benachrichtigung
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Audio {
        data: Bytes,
        speaker: Option<String>,
    },
    SpeakerTurn(SpeakerTurn),
    Transcript(TranscriptEvent),
    GameState(GameState),
    PhaseChange(GamePhaseChange),
    ServerError(ServerError),
    Status(ConnectionStatus),
}

impl Notification {
    /// Stellt die Benachrichtigung an den passenden Callback zu
    pub fn deliver(self, callbacks: &TransportCallbacks) {
        match self {
            Self::Audio { data, speaker } => {
                if let Some(cb) = &callbacks.on_audio {
                    cb(data, speaker);
                }
            }
            Self::SpeakerTurn(turn) => {
                if let Some(cb) = &callbacks.on_speaker_turn {
                    cb(turn);
                }
            }
            Self::Transcript(ev) => {
                if let Some(cb) = &callbacks.on_transcript {
                    cb(ev);
                }
            }
            Self::GameState(state) => {
                if let Some(cb) = &callbacks.on_game_state {
                    cb(state);
                }
            }
            Self::PhaseChange(change) => {
                if let Some(cb) = &callbacks.on_phase_change {
                    cb(change);
                }
            }
            Self::ServerError(err) => {
                if let Some(cb) = &callbacks.on_server_error {
                    cb(err);
                }
            }
            Self::Status(status) => {
                if let Some(cb) = &callbacks.on_status_change {
                    cb(status);
                }
            }
        }
    }
}

/// Ergebnis eines Dispatch-Schritts
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub notifications: Vec<Notification>,
    /// Direkte Antwort an den Server (z.B. Pong auf Ping)
    pub reply: Option<ControlMessage>,
}

/// Zustand einer Verbindung
#[derive(Debug, Default)]
pub struct SessionState {
    pub snapshot: ConnectionSnapshot,
    pub ping: PingTracker,
}

impl SessionState {
    pub fn connecting() -> Self {
        Self {
            snapshot: ConnectionSnapshot::connecting(),
            ping: PingTracker::new(),
        }
    }

    /// Setzt den Status; liefert eine Benachrichtigung nur bei echter Aenderung
    pub fn set_status(&mut self, status: ConnectionStatus) -> Option<Notification> {
        if self.snapshot.status == status {
            return None;
        }
        debug!(von = %self.snapshot.status, nach = %status, "Verbindungsstatus");
        self.snapshot.status = status;
        Some(Notification::Status(status))
    }

    /// Wechselt nach `Error` und merkt sich die Meldung
    pub fn fail(&mut self, message: impl Into<String>) -> Option<Notification> {
        self.snapshot.last_error = Some(message.into());
        self.set_status(ConnectionStatus::Error)
    }

    /// Verarbeitet eine eingehende Nachricht
    pub fn handle(&mut self, message: WireMessage, now: Instant) -> Outcome {
        match message {
            WireMessage::Audio(data) => {
                let speaker = self.snapshot.speaker_name();
                trace!(bytes = data.len(), sprecher = ?speaker, "Audio empfangen");
                Outcome {
                    notifications: vec![Notification::Audio { data, speaker }],
                    reply: None,
                }
            }
            WireMessage::Control(msg) => self.handle_control(msg, now),
        }
    }

    /// Parst einen Text-Frame; ungueltiges JSON wird verworfen
    pub fn handle_text(&mut self, text: &str, now: Instant) -> Outcome {
        match WireMessage::from_text(text) {
            Ok(message) => self.handle(message, now),
            Err(e) => {
                warn!(fehler = %e, "Ungueltige Control-Nachricht verworfen");
                Outcome::default()
            }
        }
    }

    fn handle_control(&mut self, msg: ControlMessage, now: Instant) -> Outcome {
        let typ = msg.type_name();
        trace!(typ, "Control-Nachricht empfangen");
        let mut outcome = Outcome::default();

        match msg {
            ControlMessage::Pong {} => {
                if let Some(rtt) = self.ping.pong_received(now) {
                    let ms = rtt.as_millis() as u64;
                    self.snapshot.latency_ms = Some(ms);
                    trace!(latenz_ms = ms, "Latenz gemessen");
                }
            }
            ControlMessage::Ping {} => {
                outcome.reply = Some(ControlMessage::pong());
            }
            ControlMessage::SpeakerTurn(turn) => {
                debug!(sprecher = %turn.speaker_name, "Sprecherwechsel angekuendigt");
                self.snapshot.current_speaker = Some(turn.clone());
                outcome.notifications.push(Notification::SpeakerTurn(turn));
            }
            ControlMessage::Transcript(ev) => {
                self.snapshot.last_transcript = Some(ev.clone());
                outcome.notifications.push(Notification::Transcript(ev));
            }
            ControlMessage::GameState(state) => {
                self.snapshot.game_state = Some(state.clone());
                outcome.notifications.push(Notification::GameState(state));
            }
            ControlMessage::PhaseChange(change) => {
                if let Some(state) = self.snapshot.game_state.as_mut() {
                    state.phase = change.new_phase.clone();
                    state.day = change.day;
                }
                outcome.notifications.push(Notification::PhaseChange(change));
            }
            ControlMessage::Error(err) => {
                warn!(code = %err.code, "Server meldet Fehler: {}", err.message);
                self.snapshot.last_error = Some(format!("{}: {}", err.code, err.message));
                outcome.notifications.push(Notification::ServerError(err));
            }
            ControlMessage::HumanReady {}
            | ControlMessage::IntentOverride(_)
            | ControlMessage::SkipSpeaker {} => {
                debug!(typ, "Client-Nachricht vom Server ignoriert");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use werwolf_core::SpeakerId;

    fn turn(name: &str) -> String {
        format!(
            r#"{{"type":"speaker_turn","speaker_id":"id-{name}","speaker_name":"{name}","priority":1,"can_interrupt":false}}"#
        )
    }

    fn audio(state: &mut SessionState, byte: u8) -> Option<String> {
        let out = state.handle(WireMessage::from_binary(vec![byte, 0]), Instant::now());
        match out.notifications.as_slice() {
            [Notification::Audio { speaker, .. }] => speaker.clone(),
            other => panic!("Erwartet Audio, erhalten: {:?}", other),
        }
    }

    #[test]
    fn audio_wird_dem_letzten_sprecher_zugeordnet() {
        let mut state = SessionState::connecting();
        let now = Instant::now();
        assert_eq!(audio(&mut state, 1), None);

        state.handle_text(&turn("A"), now);
        let a1 = audio(&mut state, 2);
        let a2 = audio(&mut state, 3);
        state.handle_text(&turn("B"), now);
        let b1 = audio(&mut state, 4);

        assert_eq!(
            vec![a1, a2, b1],
            vec![Some("A".into()), Some("A".into()), Some("B".into())]
        );
        assert_eq!(
            state.snapshot.current_speaker.as_ref().map(|t| t.speaker_id.clone()),
            Some(SpeakerId::new("id-B"))
        );
    }

    #[test]
    fn ungueltiges_json_wird_verworfen() {
        let mut state = SessionState::connecting();
        let out = state.handle_text("{kaputt", Instant::now());
        assert_eq!(out, Outcome::default());
        assert_eq!(state.snapshot, ConnectionSnapshot::connecting());
    }

    #[test]
    fn pong_setzt_latenz() {
        let mut state = SessionState::connecting();
        let t0 = Instant::now();
        state.ping.ping_sent(t0);
        state.handle_text(r#"{"type":"pong"}"#, t0 + Duration::from_millis(25));
        assert_eq!(state.snapshot.latency_ms, Some(25));
    }

    #[test]
    fn ping_wird_beantwortet() {
        let mut state = SessionState::connecting();
        let out = state.handle_text(r#"{"type":"ping"}"#, Instant::now());
        assert_eq!(out.reply, Some(ControlMessage::pong()));
        assert!(out.notifications.is_empty());
    }

    #[test]
    fn phasenwechsel_aktualisiert_spielzustand() {
        let mut state = SessionState::connecting();
        let now = Instant::now();
        state.handle_text(
            r#"{"type":"game_state","day":1,"phase":"discussion","alive_players":["A","B"]}"#,
            now,
        );
        let out = state.handle_text(
            r#"{"type":"phase_change","previous_phase":"discussion","new_phase":"night","day":2}"#,
            now,
        );
        assert!(matches!(
            out.notifications.as_slice(),
            [Notification::PhaseChange(_)]
        ));
        let game = state.snapshot.game_state.unwrap();
        assert_eq!(game.phase, "night");
        assert_eq!(game.day, 2);
        assert_eq!(game.alive_players, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn serverfehler_laesst_status_unveraendert() {
        let mut state = SessionState::connecting();
        state.set_status(ConnectionStatus::Connected);
        let out = state.handle_text(
            r#"{"type":"error","code":"NOT_YOUR_TURN","message":"Warte"}"#,
            Instant::now(),
        );
        assert_eq!(state.snapshot.status, ConnectionStatus::Connected);
        assert_eq!(
            state.snapshot.last_error.as_deref(),
            Some("NOT_YOUR_TURN: Warte")
        );
        assert_eq!(out.notifications.len(), 1);
    }

    #[test]
    fn transkript_wird_gespeichert() {
        let mut state = SessionState::connecting();
        state.handle_text(
            r#"{"type":"transcript","speaker_id":"p1","speaker_name":"Bob","text":"Hallo","is_final":false}"#,
            Instant::now(),
        );
        let t = state.snapshot.last_transcript.unwrap();
        assert_eq!(t.text, "Hallo");
        assert!(!t.is_final);
    }

    #[test]
    fn status_nur_bei_aenderung() {
        let mut state = SessionState::connecting();
        assert!(state.set_status(ConnectionStatus::Connecting).is_none());
        assert_eq!(
            state.set_status(ConnectionStatus::Connected),
            Some(Notification::Status(ConnectionStatus::Connected))
        );
        assert!(state.fail("weg").is_some());
        assert_eq!(state.snapshot.last_error.as_deref(), Some("weg"));
    }

    #[test]
    fn zustellung_an_callbacks() {
        use parking_lot::Mutex;
        let empfangen = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&empfangen);
        let callbacks = TransportCallbacks {
            on_audio: Some(Arc::new(move |data: Bytes, speaker: Option<String>| {
                e.lock().push((data.len(), speaker));
            })),
            ..Default::default()
        };
        Notification::Audio {
            data: Bytes::from_static(&[0, 0, 1, 0]),
            speaker: Some("A".into()),
        }
        .deliver(&callbacks);
        // Ohne Abonnent passiert nichts
        Notification::Status(ConnectionStatus::Connected).deliver(&callbacks);
        assert_eq!(*empfangen.lock(), vec![(4, Some("A".to_string()))]);
    }
}
