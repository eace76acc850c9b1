//! Abtastraten-Wandlung zwischen Geraet und Voice-Kanal
//!
//! Viele Geraete laufen nur mit 44.1 oder 48 kHz, der Kanal aber mit
//! 16 kHz (Mikrofon) bzw. 24 kHz (Wiedergabe). [`StreamResampler`] wandelt
//! einen fortlaufenden Mono-Strom mit rubato um. Eingaben werden gesammelt,
//! bis ein voller Block vorliegt; der Rest bleibt fuer den naechsten Aufruf
//! liegen, sodass an Callback-Grenzen keine Luecken entstehen.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Blockgroesse fuer die Aufnahme (Eingangs-Frames pro rubato-Aufruf)
pub const CAPTURE_BLOCK: usize = 1024;

/// Blockgroesse fuer die Ausgabe, klein fuer geringe Latenz
pub const OUTPUT_BLOCK: usize = 256;

/// Mono-Resampler fuer einen fortlaufenden Strom
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, block: usize) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::Konfiguration(
                "Abtastraten muessen groesser 0 sein".into(),
            ));
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = output_rate as f64 / input_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, block.max(1), 1)
            .map_err(|e| AudioError::Konfiguration(format!("Resampler: {}", e)))?;

        debug!(von = input_rate, nach = output_rate, block, "Resampler erstellt");
        Ok(Self {
            inner,
            input_rate,
            output_rate,
            pending: Vec::with_capacity(block),
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Eingangs-Frames, die fuer den naechsten Ausgabeblock fehlen
    pub fn block_size(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// Haengt `input` an, wandelt alle vollen Bloecke und haengt das
    /// Ergebnis an `out` an
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> AudioResult<()> {
        self.pending.extend_from_slice(input);
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let converted = self
                .inner
                .process(&[&self.pending[..needed]], None)
                .map_err(|e| AudioError::StreamFehler(format!("Resampling: {}", e)))?;
            self.pending.drain(..needed);
            if let Some(channel) = converted.first() {
                out.extend_from_slice(channel);
            }
        }
    }
}
