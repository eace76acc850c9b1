//! werwolf-protocol – Protokoll-Definitionen fuer den Voice-Kanal
//!
//! Pro Wire-Nachricht ist genau eines unterwegs: eine JSON-Control-Nachricht
//! (Text-Frame) oder rohes PCM16-Audio (Binaer-Frame). Audio wird nie in
//! JSON verpackt.

pub mod control;
pub mod pcm;
pub mod wire;

pub use control::{
    ControlMessage, GamePhaseChange, GameState, IntentOverride, ServerError, SpeakerTurn,
    TranscriptEvent,
};
pub use pcm::{decode_pcm16, encode_pcm16, PcmError};
pub use wire::WireMessage;
