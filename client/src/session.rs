//! VoiceSession – verbindet Aufnahme, Transport und Wiedergabe
//!
//! ```text
//! Mikrofon -> AudioCapture --frame--> VoiceTransport::send_audio
//! Server   -> VoiceTransport --audio+sprecher--> AudioPlayback::queue_audio
//! ```
//!
//! Beenden laeuft immer in der Reihenfolge Aufnahme, Wiedergabe, Transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};
use werwolf_audio::{AudioCapture, AudioPlayback, CaptureConfig, PlaybackStatus};
use werwolf_core::{Result, WerwolfError};
use werwolf_transport::{ConnectionSnapshot, VoiceTransport};

use crate::config::ClientConfig;

/// Zusammengefasster Zustand fuer Anzeige und Logging
#[derive(Debug, Clone, PartialEq)]
pub struct SessionZustand {
    pub verbindung: ConnectionSnapshot,
    pub wiedergabe: PlaybackStatus,
    pub aufnahme_aktiv: bool,
    /// Mikrofon-Pegel in [0, 1]
    pub pegel: f32,
}

pub struct VoiceSession {
    capture: Arc<AudioCapture>,
    playback: Arc<AudioPlayback>,
    transport: Arc<VoiceTransport>,
    capture_config: CaptureConfig,
    beendet: AtomicBool,
}

impl VoiceSession {
    /// Baut eine Session mit den cpal-Geraeten aus der Konfiguration.
    /// Verbunden wird erst mit [`starten`](Self::starten).
    pub fn neu(config: &ClientConfig) -> Result<Self> {
        let playback = AudioPlayback::cpal(config.playback_config())?;
        Ok(Self::mit_komponenten(
            AudioCapture::cpal(),
            playback,
            VoiceTransport::new(config.transport_config()),
            config.capture_config(),
        ))
    }

    /// Verdrahtet die Komponenten, ohne Mikrofon oder Verbindung zu oeffnen
    pub fn mit_komponenten(
        capture: AudioCapture,
        playback: AudioPlayback,
        transport: VoiceTransport,
        capture_config: CaptureConfig,
    ) -> Self {
        let session = Self {
            capture: Arc::new(capture),
            playback: Arc::new(playback),
            transport: Arc::new(transport),
            capture_config,
            beendet: AtomicBool::new(false),
        };
        session.verdrahten();
        session
    }

    /// Berechtigung anfragen, verbinden, Aufnahme starten.
    ///
    /// Callbacks am Transport vorher registrieren, sonst gehen die ersten
    /// Statuswechsel verloren. Muss innerhalb einer tokio-Runtime laufen.
    pub fn starten(&self) -> Result<()> {
        if self.ist_beendet() {
            return Err(WerwolfError::Getrennt("Session bereits beendet".into()));
        }
        if !self.capture.request_permission(self.capture_config.clone()) {
            let grund = self.capture.error().unwrap_or_default();
            return Err(WerwolfError::Berechtigung(grund));
        }

        self.transport.connect()?;
        if let Err(e) = self.capture.start_capture() {
            self.transport.disconnect();
            return Err(e.into());
        }

        info!(
            geraet = ?self.capture.device_label(),
            url = %self.transport.config().url,
            "Voice-Session gestartet"
        );
        Ok(())
    }

    fn verdrahten(&self) {
        // Schwache Referenzen: die Callbacks halten keine Komponente am Leben
        let transport: Weak<VoiceTransport> = Arc::downgrade(&self.transport);
        self.capture.on_frame(move |frame| {
            if let Some(transport) = transport.upgrade() {
                transport.send_audio(&frame.samples);
            }
        });

        let playback: Weak<AudioPlayback> = Arc::downgrade(&self.playback);
        self.transport.on_audio(move |data, speaker| {
            let Some(playback) = playback.upgrade() else {
                return;
            };
            if let Err(e) = playback.queue_audio(&data, speaker.as_deref()) {
                warn!(fehler = %e, "Audio-Chunk verworfen");
            }
        });
    }

    /// Beendet Aufnahme, Wiedergabe und Verbindung. Idempotent.
    pub fn beenden(&self) {
        if self.beendet.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.stop_capture();
        self.capture.clear_on_frame();
        self.playback.stop_playback();
        self.transport.disconnect();
        info!("Voice-Session beendet");
    }

    pub fn ist_beendet(&self) -> bool {
        self.beendet.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Spielsteuerung
    // -----------------------------------------------------------------------

    pub fn human_ready(&self) -> bool {
        self.transport.send_human_ready()
    }

    pub fn skip_speaker(&self) -> bool {
        self.transport.send_skip_speaker()
    }

    pub fn intent_override(&self, intent: &str, target: Option<&str>) -> bool {
        self.transport.send_intent_override(intent, target)
    }

    pub fn pause(&self) {
        debug!("Wiedergabe pausiert");
        self.playback.pause_playback();
    }

    pub fn resume(&self) {
        debug!("Wiedergabe fortgesetzt");
        self.playback.resume_playback();
    }

    // -----------------------------------------------------------------------
    // Zugriff
    // -----------------------------------------------------------------------

    pub fn zustand(&self) -> SessionZustand {
        SessionZustand {
            verbindung: self.transport.snapshot(),
            wiedergabe: self.playback.status(),
            aufnahme_aktiv: self.capture.is_capturing(),
            pegel: self.capture.level(),
        }
    }

    pub fn capture(&self) -> &AudioCapture {
        &self.capture
    }

    pub fn playback(&self) -> &AudioPlayback {
        &self.playback
    }

    pub fn transport(&self) -> &VoiceTransport {
        &self.transport
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.beenden();
    }
}
