//! Werwolf Voice-Client – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, registriert die
//! Callbacks, startet die Voice-Session und beendet sie sauber bei Ctrl-C.

use anyhow::Result;
use werwolf_client::{ClientConfig, VoiceSession};
use werwolf_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = ClientConfig::pfad_aus_umgebung();
    let config = ClientConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Werwolf Voice-Client wird initialisiert"
    );

    let session = VoiceSession::neu(&config)?;

    // Vor dem Verbinden registrieren, damit Connecting/Connected geloggt werden
    let transport = session.transport();
    transport.on_status_change(|status| {
        tracing::info!(status = %status, "Verbindungsstatus geaendert");
    });
    transport.on_transcript(|ev| {
        if ev.is_final {
            tracing::info!(sprecher = %ev.speaker_name, "{}", ev.text);
        }
    });
    transport.on_speaker_turn(|turn| {
        tracing::debug!(sprecher = %turn.speaker_name, prioritaet = turn.priority, "Sprecher ist dran");
    });
    transport.on_phase_change(|change| {
        tracing::info!(tag = change.day, phase = %change.new_phase, "Phasenwechsel");
    });
    transport.on_server_error(|err| {
        tracing::warn!(code = %err.code, "Server-Fehler: {}", err.message);
    });

    if let Err(e) = session.starten() {
        tracing::error!(wiederholbar = e.ist_wiederholbar(), "Voice-Session nicht gestartet: {}", e);
        return Err(e.into());
    }

    tracing::info!("Client laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown-Signal empfangen, Client wird beendet");

    let zustand = session.zustand();
    tracing::debug!(
        latenz_ms = ?zustand.verbindung.latency_ms,
        queue_sek = zustand.wiedergabe.queued_duration,
        "Letzter Zustand"
    );
    session.beenden();
    Ok(())
}
