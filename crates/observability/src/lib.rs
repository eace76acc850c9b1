//! # werwolf-observability
//!
//! Structured Logging fuer Werwolf Voice via tracing-subscriber
//! (Text oder JSON, per Umgebung uebersteuerbar).

pub mod logging;

pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
