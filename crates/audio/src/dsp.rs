//! Eingangsverarbeitung fuer Capture-Frames
//!
//! Setzt die Flags der `CaptureConfig` in Software um, in der Reihenfolge
//! Rauschunterdrueckung -> Auto-Gain. Echo-Unterdrueckung bietet cpal nicht
//! an; das Flag wird beim Aufbau nur protokolliert.

use tracing::{debug, warn};

use crate::capture::CaptureConfig;

/// Frames unter diesem RMS aktualisieren die Rauschschaetzung
const RAUSCH_SCHWELLE: f32 = 0.02;
/// Glaettung der Rauschschaetzung (hoeher = traeger)
const RAUSCH_GLAETTUNG: f32 = 0.9;
const SUBTRAKTION: f32 = 2.5;
/// Minimaler Gain nach Subtraktion
const RAUSCH_BODEN: f32 = 0.1;

/// Ziel-RMS der Verstaerkung (~ -20 dBFS)
const AGC_ZIEL: f32 = 0.1;
const AGC_MIN_GAIN: f32 = 0.1;
const AGC_MAX_GAIN: f32 = 10.0;
/// Anteil des Sollwerts pro Frame: schnell nach unten, langsam nach oben
const AGC_ATTACK: f32 = 0.6;
const AGC_RELEASE: f32 = 0.1;
/// Leisere Frames gelten als Stille und veraendern den Gain nicht
const AGC_STILLE: f32 = 0.003;
const LIMITER: f32 = 0.95;

/// RMS eines Frames
fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Energiebasierte Rauschsubtraktion: Gain `max(boden, 1 - a * noise/rms)`
#[derive(Debug, Default)]
struct NoiseSuppressor {
    noise_estimate: f32,
}

impl NoiseSuppressor {
    fn process(&mut self, samples: &mut [f32]) {
        let rms = frame_rms(samples);
        if rms < RAUSCH_SCHWELLE {
            self.noise_estimate =
                RAUSCH_GLAETTUNG * self.noise_estimate + (1.0 - RAUSCH_GLAETTUNG) * rms;
        }
        if self.noise_estimate < 1e-7 {
            return;
        }
        let gain = if rms > 1e-7 {
            (1.0 - SUBTRAKTION * self.noise_estimate / rms).max(RAUSCH_BODEN)
        } else {
            RAUSCH_BODEN
        };
        samples.iter_mut().for_each(|s| *s *= gain);
    }
}

/// Verstaerkungsregelung auf Frame-Ebene mit Hard-Limiter.
/// Der Gain wird innerhalb des Frames linear interpoliert.
#[derive(Debug)]
struct Agc {
    gain: f32,
}

impl Agc {
    fn process(&mut self, samples: &mut [f32]) {
        if samples.is_empty() {
            return;
        }
        let rms = frame_rms(samples);
        let start = self.gain;
        if rms >= AGC_STILLE {
            let soll = (AGC_ZIEL / rms).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN);
            let k = if soll < self.gain { AGC_ATTACK } else { AGC_RELEASE };
            self.gain += (soll - self.gain) * k;
        }
        let n = samples.len() as f32;
        for (i, sample) in samples.iter_mut().enumerate() {
            let gain = start + (self.gain - start) * (i as f32 + 1.0) / n;
            *sample = (*sample * gain).clamp(-LIMITER, LIMITER);
        }
    }
}

/// Kette der aktivierten Prozessoren
#[derive(Debug, Default)]
pub struct InputPipeline {
    noise: Option<NoiseSuppressor>,
    agc: Option<Agc>,
}

impl InputPipeline {
    /// Baut die Pipeline passend zu den Capture-Flags
    pub fn for_capture(config: &CaptureConfig) -> Self {
        if config.echo_cancellation {
            warn!("Echo-Unterdrueckung wird von der Plattform nicht angeboten, Flag ignoriert");
        }
        let pipeline = Self {
            noise: config.noise_suppression.then(NoiseSuppressor::default),
            agc: config.auto_gain.then_some(Agc { gain: 1.0 }),
        };
        debug!(
            rauschunterdrueckung = pipeline.noise.is_some(),
            auto_gain = pipeline.agc.is_some(),
            "Eingangs-Pipeline aufgebaut"
        );
        pipeline
    }

    /// Verarbeitet einen Frame in-place
    pub fn process(&mut self, samples: &mut [f32]) {
        if let Some(noise) = self.noise.as_mut() {
            noise.process(samples);
        }
        if let Some(agc) = self.agc.as_mut() {
            agc.process(samples);
        }
    }
}
