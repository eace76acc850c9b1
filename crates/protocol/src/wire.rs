//! Wire-Format des Voice-Kanals
//!
//! Jede Nachricht ist entweder ein Text-Frame mit genau einer
//! [`ControlMessage`] oder ein Binaer-Frame mit rohem PCM16-Audio.
//!
//! ```text
//! Text-Frame:   {"type": "...", ...}          (JSON, UTF-8)
//! Binaer-Frame: | s0 lo | s0 hi | s1 lo | ... (PCM16 LE, mono)
//! ```
//!
//! ## Protokoll-Annahme
//! Binaer-Frames tragen keine Sprecher-Identitaet. Die Zuordnung ergibt
//! sich ausschliesslich aus der Reihenfolge relativ zum letzten
//! `speaker_turn`. Das setzt einen geordneten, zuverlaessigen Transport
//! voraus (WebSocket ueber TCP).

use bytes::Bytes;

use crate::control::ControlMessage;

/// Eine Nachricht auf dem Draht
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// PCM16-Audio ohne Envelope
    Audio(Bytes),
    /// JSON-Control-Nachricht
    Control(ControlMessage),
}

impl WireMessage {
    /// Parst einen Text-Frame
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        ControlMessage::from_json(text).map(Self::Control)
    }

    /// Verpackt einen Binaer-Frame. Der Inhalt wird nicht interpretiert.
    pub fn from_binary(data: impl Into<Bytes>) -> Self {
        Self::Audio(data.into())
    }

    /// Gibt true zurueck fuer Binaer-Frames
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

impl From<ControlMessage> for WireMessage {
    fn from(msg: ControlMessage) -> Self {
        Self::Control(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_wird_control() {
        let msg = WireMessage::from_text(r#"{"type":"skip_speaker"}"#).unwrap();
        assert_eq!(msg, WireMessage::Control(ControlMessage::skip_speaker()));
        assert!(!msg.is_audio());
    }

    #[test]
    fn binaer_frame_bleibt_unveraendert() {
        // Auch Bytes, die wie JSON aussehen, sind Audio
        let payload = br#"{"type":"ping"}"#.to_vec();
        let msg = WireMessage::from_binary(payload.clone());
        assert_eq!(msg, WireMessage::Audio(Bytes::from(payload)));
        assert!(msg.is_audio());
    }

    #[test]
    fn ungueltiger_text_frame() {
        assert!(WireMessage::from_text("{nicht json").is_err());
    }
}
