//! PCM16-Formatkonvertierung
//!
//! Binaer-Frames transportieren rohes PCM: 16 Bit signed, little-endian,
//! mono, ohne Header. Intern arbeitet die Audio-Engine mit f32 in [-1, 1].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Skalierung zwischen f32 und i16 (2^15)
const PCM16_SKALA: f32 = 32768.0;

/// Fehler beim Dekodieren eines Binaer-Frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PcmError {
    #[error("PCM16-Payload mit ungerader Laenge: {0} Bytes")]
    UngeradeLaenge(usize),
}

/// Konvertiert ein f32-Sample nach i16 (mit Clipping)
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * PCM16_SKALA)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Konvertiert ein i16-Sample nach f32 in [-1, 1)
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_SKALA
}

/// Packt f32-Samples als PCM16 little-endian
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(f32_to_i16(s));
    }
    buf.freeze()
}

/// Entpackt PCM16 little-endian zu f32-Samples
pub fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>, PcmError> {
    if data.len() % 2 != 0 {
        return Err(PcmError::UngeradeLaenge(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect())
}

/// Dauer einer Sample-Anzahl in Sekunden
pub fn dauer_sekunden(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}
