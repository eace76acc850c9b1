//! werwolf-audio – Client Audio Engine
//!
//! Audio-Seite des Voice-Kanals:
//! - Mikrofon-Capture via cpal mit festen Frame-Groessen
//! - Abtastraten-Wandlung zwischen Geraet und Kanal (rubato)
//! - Eingangsverarbeitung: Rauschunterdrueckung, Auto-Gain
//! - Pegelmessung fuer die UI
//! - Lueckenlose Wiedergabe mit dauerbegrenzter Queue

pub mod capture;
pub mod device;
pub mod dsp;
pub mod error;
pub mod meter;
pub mod output;
pub mod playback;
pub mod resample;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{
    ActiveInput, AudioCapture, AudioFrame, CaptureConfig, CpalMicrophone, FrameAssembler,
    InputCallback, InputFormat, Microphone,
};
pub use device::{load_cpal_input_device, load_cpal_output_device};
pub use dsp::InputPipeline;
pub use error::{AudioError, AudioResult};
pub use meter::LevelReading;
pub use output::{CpalPlaybackSink, OutputRenderer, Timeline};
pub use playback::{
    AudioPlayback, ChunkEnded, PlaybackChunk, PlaybackConfig, PlaybackQueue, PlaybackSink,
    PlaybackStatus,
};
