//! Structured Logging Setup via tracing-subscriber
//!
//! Level und Format kommen aus der Konfiguration und lassen sich per
//! Umgebungsvariable uebersteuern:
//! - `WW_LOG_LEVEL`: Filter-Ausdruck (z.B. `debug` oder `werwolf_transport=trace`)
//! - `WW_LOG_FORMAT`: `text` oder `json`

use anyhow::anyhow;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "WW_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "WW_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Faellt bei einem ungueltigen Filter auf `info` zurueck. Ein zweiter
/// Aufruf schlaegt fehl, da bereits ein globaler Subscriber gesetzt ist.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| format.to_string());

    let result = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    result.map_err(|e| anyhow!("Logging konnte nicht initialisiert werden: {}", e))
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
