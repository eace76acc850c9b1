//! Audio-Geraete-Auswahl
//!
//! Ein- und Ausgabegeraete werden per (Teil-)Name gesucht; ohne Name wird
//! das Standardgeraet des cpal-Hosts verwendet.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};

use crate::error::{AudioError, AudioResult};

/// Label fuer Geraete, deren Name nicht lesbar ist
const UNBEKANNTES_GERAET: &str = "Unbekanntes Geraet";

/// Laedt ein cpal-Device fuer Eingabe (None = Standard)
pub fn load_cpal_input_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(n) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            find_by_name(devices, n)
        }
    }
}

/// Laedt ein cpal-Device fuer Ausgabe (None = Standard)
pub fn load_cpal_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(n) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            find_by_name(devices, n)
        }
    }
}

/// Anzeigename eines Geraets
pub fn device_label(device: &Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| UNBEKANNTES_GERAET.to_string())
}

fn find_by_name(devices: impl Iterator<Item = Device>, name: &str) -> AudioResult<Device> {
    for device in devices {
        if let Ok(dev_name) = device.name() {
            if dev_name.contains(name) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::GeraetNichtGefunden(name.to_string()))
}

/// Waehlt eine Geraete-Konfiguration fuer die gewuenschte Abtastrate.
///
/// Bietet ein Bereich die Rate direkt an, wird er genommen (Mono bevorzugt).
/// Sonst laeuft das Geraet mit der naechstgelegenen nativen Rate und der
/// Aufrufer wandelt um.
pub(crate) fn pick_stream_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    let ranges: Vec<_> = ranges.collect();
    let direkt = ranges
        .iter()
        .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
        .min_by_key(|c| c.channels());
    if let Some(range) = direkt {
        return Some(range.clone().with_sample_rate(SampleRate(sample_rate)));
    }

    let range = ranges.into_iter().min_by_key(|c| c.channels())?;
    let nativ = sample_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    Some(range.with_sample_rate(SampleRate(nativ)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SupportedBufferSize};

    fn bereich(kanaele: u16, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            kanaele,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    #[test]
    fn passende_rate_wird_direkt_genommen() {
        let ranges = vec![bereich(2, 8_000, 48_000), bereich(1, 8_000, 48_000)];
        let config = pick_stream_config(ranges.into_iter(), 16_000).unwrap();
        assert_eq!(config.sample_rate().0, 16_000);
        assert_eq!(config.channels(), 1);
    }

    #[test]
    fn ohne_passende_rate_laeuft_das_geraet_nativ() {
        let ranges = vec![bereich(2, 44_100, 44_100), bereich(2, 48_000, 48_000)];
        let config = pick_stream_config(ranges.into_iter(), 16_000).unwrap();
        assert_eq!(config.sample_rate().0, 44_100);

        let ranges = vec![bereich(2, 48_000, 48_000)];
        let config = pick_stream_config(ranges.into_iter(), 24_000).unwrap();
        assert_eq!(config.sample_rate().0, 48_000);
    }

    #[test]
    fn ohne_bereiche_keine_konfiguration() {
        assert!(pick_stream_config(std::iter::empty(), 16_000).is_none());
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn standard_ausgabegeraet_ladbar() {
        let device = load_cpal_output_device(None).expect("Standardgeraet erwartet");
        assert!(!device_label(&device).is_empty());
    }
}
