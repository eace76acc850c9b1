//! werwolf-transport – WebSocket-Transport fuer den Voice-Kanal
//!
//! Eine Verbindung pro [`VoiceTransport`]. Ausgehend: PCM16-Audio als
//! Binaer-Frames, Control-Nachrichten als JSON. Eingehend: Audio wird dem
//! Sprecher des letzten `speaker_turn` zugeordnet, Control-Nachrichten
//! aktualisieren den [`ConnectionSnapshot`].

pub mod dispatch;
pub mod error;
pub mod latency;
pub mod state;
pub mod transport;

pub use dispatch::{Notification, TransportCallbacks};
pub use error::{TransportError, TransportResult};
pub use latency::{PingTracker, DEFAULT_PING_INTERVAL};
pub use state::{build_url, ConnectionSnapshot, ConnectionStatus};
pub use transport::{TransportConfig, VoiceTransport};
