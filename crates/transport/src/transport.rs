//! VoiceTransport – WebSocket-Verbindung zum Spielserver
//!
//! Jede Verbindung laeuft in einem eigenen tokio-Task. Der Task liest
//! eingehende Frames, schreibt ausgehende Nachrichten aus einer Queue und
//! sendet periodisch einen Ping fuer die Latenzmessung.
//!
//! ## Generationen
//! Jedes `connect()` und `disconnect()` erhoeht die Generation. Ein Task
//! darf den Zustand nur aendern, solange seine Generation aktuell ist;
//! ein veralteter Task schliesst seinen Socket und beendet sich.
//!
//! Wiederverbinden passiert nie automatisch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use werwolf_core::SessionId;
use werwolf_protocol::control::{
    ControlMessage, GamePhaseChange, GameState, ServerError, SpeakerTurn, TranscriptEvent,
};
use werwolf_protocol::pcm::encode_pcm16;
use werwolf_protocol::wire::WireMessage;

use crate::dispatch::{Notification, Outcome, SessionState, TransportCallbacks};
use crate::error::{TransportError, TransportResult};
use crate::latency::DEFAULT_PING_INTERVAL;
use crate::state::{build_url, ConnectionSnapshot, ConnectionStatus};

/// Konfiguration des Transports
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// ws:// oder wss:// Endpunkt
    pub url: String,
    /// Wird als Query-Parameter `session_id` angehaengt
    pub session_id: Option<SessionId>,
    pub ping_interval: Duration,
    /// Kapazitaet der Sende-Queue in Nachrichten
    pub send_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/voice".to_string(),
            session_id: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            send_queue: 256,
        }
    }
}

struct Inner {
    generation: u64,
    session: SessionState,
    outbound: Option<mpsc::Sender<Message>>,
}

struct Shared {
    inner: Mutex<Inner>,
    callbacks: RwLock<TransportCallbacks>,
}

impl Shared {
    /// Fuehrt `f` nur aus, solange `generation` die aktuelle Verbindung ist
    fn apply<R>(&self, generation: u64, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return None;
        }
        Some(f(&mut inner.session))
    }

    /// Stellt Benachrichtigungen ohne gehaltenen Zustands-Lock zu
    fn notify(&self, notifications: impl IntoIterator<Item = Notification>) {
        let mut notifications = notifications.into_iter().peekable();
        if notifications.peek().is_none() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        for notification in notifications {
            notification.deliver(&callbacks);
        }
    }
}

/// Voice-Transport ueber WebSocket
pub struct VoiceTransport {
    config: TransportConfig,
    shared: Arc<Shared>,
}

impl VoiceTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    generation: 0,
                    session: SessionState::default(),
                    outbound: None,
                }),
                callbacks: RwLock::new(TransportCallbacks::default()),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Verbindet mit URL und Session-ID aus der Konfiguration
    pub fn connect(&self) -> TransportResult<()> {
        let url = self.config.url.clone();
        let session_id = self.config.session_id.clone();
        self.connect_to(&url, session_id.as_ref())
    }

    /// Baut eine bestehende Verbindung ab und startet einen neuen
    /// Verbindungsversuch. Der Status ist danach sofort `Connecting`.
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn connect_to(&self, url: &str, session_id: Option<&SessionId>) -> TransportResult<()> {
        let url = build_url(url, session_id.map(SessionId::as_str))?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::KeineRuntime)?;
        let (tx, rx) = mpsc::channel::<Message>(self.config.send_queue.max(1));

        let (generation, notification) = {
            let mut inner = self.shared.inner.lock();
            // Alte Sende-Queue schliessen: der alte Task sendet Close und endet
            if inner.outbound.take().is_some() {
                debug!("Bestehende Verbindung wird ersetzt");
            }
            inner.generation += 1;
            let vorher = inner.session.snapshot.status;
            inner.session = SessionState::connecting();
            inner.outbound = Some(tx);
            let notification = (vorher != ConnectionStatus::Connecting)
                .then_some(Notification::Status(ConnectionStatus::Connecting));
            (inner.generation, notification)
        };
        self.shared.notify(notification);

        info!(url = %url, "Verbinde mit Voice-Server");
        runtime.spawn(run_connection(
            Arc::clone(&self.shared),
            generation,
            url,
            self.config.ping_interval,
            rx,
        ));
        Ok(())
    }

    /// Beendet Ping und Verbindung (Close 1000). Idempotent.
    pub fn disconnect(&self) {
        let notification = {
            let mut inner = self.shared.inner.lock();
            if inner.outbound.take().is_some() {
                info!("Verbindung wird getrennt");
            }
            inner.generation += 1;
            inner.session.set_status(ConnectionStatus::Disconnected)
        };
        self.shared.notify(notification);
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    /// Sendet Samples als PCM16-Binaerframe
    pub fn send_audio(&self, samples: &[f32]) -> bool {
        self.send_audio_bytes(encode_pcm16(samples))
    }

    /// Sendet bereits kodiertes PCM16 unveraendert
    pub fn send_audio_bytes(&self, pcm: Bytes) -> bool {
        self.send(Message::Binary(pcm.to_vec()), "audio")
    }

    pub fn send_human_ready(&self) -> bool {
        self.send_control(&ControlMessage::human_ready())
    }

    pub fn send_skip_speaker(&self) -> bool {
        self.send_control(&ControlMessage::skip_speaker())
    }

    pub fn send_intent_override(&self, intent: &str, target: Option<&str>) -> bool {
        self.send_control(&ControlMessage::intent_override(
            intent,
            target.map(str::to_string),
        ))
    }

    /// Sendet eine beliebige Control-Nachricht
    pub fn send_control(&self, msg: &ControlMessage) -> bool {
        match msg.to_json() {
            Ok(json) => self.send(Message::Text(json), msg.type_name()),
            Err(e) => {
                warn!(fehler = %e, "Control-Nachricht nicht serialisierbar");
                false
            }
        }
    }

    /// Reiht die Nachricht ein, falls verbunden; sonst wird sie verworfen
    fn send(&self, message: Message, art: &str) -> bool {
        let inner = self.shared.inner.lock();
        if !inner.session.snapshot.status.ist_offen() {
            trace!(art, "Nicht verbunden, Nachricht verworfen");
            return false;
        }
        let Some(tx) = inner.outbound.as_ref() else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(art, "Sende-Queue voll, Nachricht verworfen");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.inner.lock().session.snapshot.clone()
    }

    // -----------------------------------------------------------------------
    // Callbacks (je Slot ein Abonnent, neue Registrierung ersetzt)
    // -----------------------------------------------------------------------

    /// Eingehendes Audio mit Sprecher-Label des letzten `speaker_turn`
    pub fn on_audio(&self, callback: impl Fn(Bytes, Option<String>) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_audio = Some(Arc::new(callback));
    }

    pub fn on_speaker_turn(&self, callback: impl Fn(SpeakerTurn) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_speaker_turn = Some(Arc::new(callback));
    }

    pub fn on_transcript(&self, callback: impl Fn(TranscriptEvent) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_transcript = Some(Arc::new(callback));
    }

    pub fn on_game_state(&self, callback: impl Fn(GameState) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_game_state = Some(Arc::new(callback));
    }

    pub fn on_phase_change(&self, callback: impl Fn(GamePhaseChange) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_phase_change = Some(Arc::new(callback));
    }

    pub fn on_server_error(&self, callback: impl Fn(ServerError) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_server_error = Some(Arc::new(callback));
    }

    pub fn on_status_change(&self, callback: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        self.shared.callbacks.write().on_status_change = Some(Arc::new(callback));
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Verbindungs-Task
// ---------------------------------------------------------------------------

/// Grund fuer das Ende der Verbindungsschleife
enum Ende {
    /// Sende-Queue geschlossen (disconnect oder neues connect)
    Lokal,
    /// Generation nicht mehr aktuell
    Veraltet,
    /// Close-Frame vom Server
    Geschlossen(Option<CloseFrame<'static>>),
    Fehler(String),
}

fn normal_close() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    ping_interval: Duration,
    mut outbound: mpsc::Receiver<Message>,
) {
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(url = %url, fehler = %e, "Verbindungsaufbau fehlgeschlagen");
            let notification = shared
                .apply(generation, |s| {
                    s.fail(TransportError::Verbindung(e.to_string()).to_string())
                })
                .flatten();
            shared.notify(notification);
            return;
        }
    };

    match shared.apply(generation, |s| s.set_status(ConnectionStatus::Connected)) {
        Some(notification) => shared.notify(notification),
        None => {
            debug!("Verbindung bereits ersetzt, schliesse sofort");
            let _ = ws.close(Some(normal_close())).await;
            return;
        }
    }
    info!(url = %url, "Voice-Verbindung hergestellt");

    let (mut sink, mut stream) = ws.split();
    let ping_interval = ping_interval.max(Duration::from_millis(1));
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ende = loop {
        tokio::select! {
            frame = stream.next() => {
                let outcome = match frame {
                    Some(Ok(Message::Binary(data))) => shared.apply(generation, |s| {
                        s.handle(WireMessage::from_binary(data), Instant::now())
                    }),
                    Some(Ok(Message::Text(text))) => {
                        shared.apply(generation, |s| s.handle_text(&text, Instant::now()))
                    }
                    Some(Ok(Message::Close(frame))) => break Ende::Geschlossen(frame),
                    // Ping/Pong auf WebSocket-Ebene beantwortet tungstenite selbst
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Ende::Fehler(TransportError::from(e).to_string()),
                    None => break Ende::Fehler("Verbindung ohne Close-Frame beendet".into()),
                };
                let Some(Outcome { notifications, reply }) = outcome else {
                    break Ende::Veraltet;
                };
                shared.notify(notifications);
                if let Some(reply) = reply {
                    if let Ok(json) = reply.to_json() {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            break Ende::Fehler(TransportError::from(e).to_string());
                        }
                    }
                }
            }
            cmd = outbound.recv() => match cmd {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        break Ende::Fehler(TransportError::from(e).to_string());
                    }
                }
                None => break Ende::Lokal,
            },
            _ = ping.tick() => {
                if shared.apply(generation, |s| s.ping.ping_sent(Instant::now())).is_none() {
                    break Ende::Veraltet;
                }
                let json = match ControlMessage::ping().to_json() {
                    Ok(json) => json,
                    Err(e) => break Ende::Fehler(TransportError::from(e).to_string()),
                };
                trace!("Ping gesendet");
                if let Err(e) = sink.send(Message::Text(json)).await {
                    break Ende::Fehler(TransportError::from(e).to_string());
                }
            }
        }
    };

    match ende {
        Ende::Lokal | Ende::Veraltet => {
            let _ = sink.send(Message::Close(Some(normal_close()))).await;
            let _ = sink.close().await;
            debug!("Verbindung lokal geschlossen");
        }
        Ende::Geschlossen(frame) => {
            let _ = sink.close().await;
            let (code, reason) = frame
                .map(|f| (f.code, f.reason.into_owned()))
                .unwrap_or((CloseCode::Status, String::new()));
            let notification = if code == CloseCode::Normal {
                info!("Verbindung vom Server sauber geschlossen");
                shared.apply(generation, |s| s.set_status(ConnectionStatus::Disconnected))
            } else {
                let meldung = TransportError::AbnormalGeschlossen(format!(
                    "Code {} {}",
                    u16::from(code),
                    reason
                ))
                .to_string();
                warn!("{}", meldung);
                shared.apply(generation, |s| s.fail(meldung.trim_end()))
            };
            shared.notify(notification.flatten());
        }
        Ende::Fehler(meldung) => {
            warn!(fehler = %meldung, "Voice-Verbindung abgebrochen");
            let notification = shared.apply(generation, |s| s.fail(meldung)).flatten();
            shared.notify(notification);
        }
    }
}
