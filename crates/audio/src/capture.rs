//! Mikrofon-Capture
//!
//! Ablauf:
//! 1. `request_permission` oeffnet einen Test-Stream, merkt sich das
//!    Geraete-Label und gibt den Stream sofort wieder frei
//! 2. `start_capture` oeffnet den dauerhaften Stream. Die Plattform-Callbacks
//!    werden auf Mono heruntergemischt, von der Geraete-Rate auf
//!    `sample_rate` gewandelt, in Frames zu exakt `buffer_size` Samples
//!    zerlegt, durch die Eingangs-Pipeline geschickt und als frische Kopie
//!    an den registrierten Frame-Callback uebergeben
//! 3. Parallel misst ein eigener Thread den Pegel (siehe [`crate::meter`])
//!
//! Der cpal-Stream ist nicht `Send` und lebt deshalb auf einem eigenen
//! Thread, der per Stop-Kanal beendet wird.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use ringbuf::traits::Producer;
use tracing::{debug, error, info, warn};

use crate::device::{device_label, load_cpal_input_device, pick_stream_config};
use crate::dsp::InputPipeline;
use crate::error::{AudioError, AudioResult};
use crate::meter::{LevelMeter, LevelReading, MeterProducer};
use crate::resample::{StreamResampler, CAPTURE_BLOCK};

/// Konfiguration einer Capture-Sitzung. Unveraenderlich waehrend der Aufnahme.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Frame-Groesse in Samples (4096 bei 16 kHz ~ 256 ms)
    pub buffer_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
    /// Name (oder Namensteil) des Eingabegeraets, None = Standard
    pub device_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_size: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
            device_name: None,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::Konfiguration(
                "sample_rate muss groesser 0 sein".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(AudioError::Konfiguration(
                "buffer_size muss groesser 0 sein".into(),
            ));
        }
        Ok(())
    }

    /// Dauer eines Frames
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Ein fertiger Capture-Frame (Mono, `CaptureConfig::sample_rate`)
///
/// Immer eine eigene Kopie; der Plattform-Puffer wird wiederverwendet.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Callback fuer fertige Frames (Single-Subscriber)
pub type FrameCallback = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Format der rohen Plattform-Daten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub channels: u16,
    /// Native Abtastrate des Geraets
    pub sample_rate: u32,
}

/// Callback fuer rohe Plattform-Daten (interleavt)
pub type InputCallback = Box<dyn FnMut(&[f32], InputFormat) + Send>;

/// Mischt interleavte Samples nach Mono in `out` (wird vorher geleert)
pub fn downmix_into(data: &[f32], channels: u16, out: &mut Vec<f32>) {
    out.clear();
    match channels {
        0 | 1 => out.extend_from_slice(data),
        n => out.extend(
            data.chunks(n as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        ),
    }
}

/// Zerlegt einen beliebig gestueckelten Mono-Strom in Frames fester Groesse.
/// Ueberzaehlige Samples bleiben fuer den naechsten Aufruf liegen.
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Haengt Samples an und ruft `emit` fuer jeden vollen Frame genau einmal auf
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            emit(std::mem::replace(&mut self.pending, rest));
        }
    }

    /// Anzahl noch nicht ausgelieferter Samples
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Plattform-Schnittstelle
// ---------------------------------------------------------------------------

/// Zugriff auf ein Mikrofon
pub trait Microphone: Send + Sync {
    /// Oeffnet einen Test-Stream, gibt ihn sofort frei und liefert das Geraete-Label
    fn test_stream(&self, config: &CaptureConfig) -> AudioResult<String>;

    /// Oeffnet den dauerhaften Stream. `on_data` laeuft auf dem Audio-Pfad.
    ///
    /// Schlaegt das Oeffnen fehl, sind bereits belegte Ressourcen freigegeben.
    fn open(&self, config: &CaptureConfig, on_data: InputCallback)
        -> AudioResult<Box<dyn ActiveInput>>;
}

/// Ein laufender Eingabe-Stream
pub trait ActiveInput: Send {
    /// Stoppt den Stream und gibt das Geraet frei. Idempotent.
    fn stop(&mut self);
}

/// Mikrofon ueber cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl Microphone for CpalMicrophone {
    fn test_stream(&self, config: &CaptureConfig) -> AudioResult<String> {
        let device = load_cpal_input_device(config.device_name.as_deref())?;
        let label = device_label(&device);
        let (stream_config, format) = input_stream_config(&device, config.sample_rate)?;

        let noop: InputCallback = Box::new(|_: &[f32], _: InputFormat| {});
        let stream = build_for_format(&device, &stream_config, format, noop)
            .map_err(|e| AudioError::ZugriffVerweigert(e.to_string()))?;
        drop(stream);

        debug!(geraet = %label, "Test-Stream geoeffnet und freigegeben");
        Ok(label)
    }

    fn open(
        &self,
        config: &CaptureConfig,
        on_data: InputCallback,
    ) -> AudioResult<Box<dyn ActiveInput>> {
        let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let config = config.clone();

        let thread = std::thread::Builder::new()
            .name("werwolf-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&config, on_data) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blockiert bis stop() oder bis der Handle gedroppt wird
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture-Stream freigegeben");
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInput {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Capture-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }
    }
}

struct CpalInput {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveInput for CpalInput {
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture-Thread ist abgestuerzt");
            }
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn input_stream_config(
    device: &Device,
    sample_rate: u32,
) -> AudioResult<(StreamConfig, SampleFormat)> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    let supported = pick_stream_config(ranges, sample_rate).ok_or_else(|| {
        AudioError::Konfiguration("Eingabegeraet bietet keine Konfiguration an".into())
    })?;
    Ok((supported.config(), supported.sample_format()))
}

/// Laeuft auf dem Capture-Thread. Bei Fehlern wird der Stream beim Verlassen
/// der Funktion wieder freigegeben.
fn open_input_stream(config: &CaptureConfig, on_data: InputCallback) -> AudioResult<Stream> {
    let device = load_cpal_input_device(config.device_name.as_deref())?;
    let (stream_config, format) = input_stream_config(&device, config.sample_rate)?;

    let stream = build_for_format(&device, &stream_config, format, on_data)
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    info!(
        geraet = %device_label(&device),
        sample_rate = stream_config.sample_rate.0,
        kanaele = stream_config.channels,
        "Capture-Stream geoeffnet"
    );
    Ok(stream)
}

fn build_for_format(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    on_data: InputCallback,
) -> Result<Stream, cpal::BuildStreamError> {
    match format {
        SampleFormat::F32 => build_input::<f32>(device, config, on_data),
        SampleFormat::I16 => build_input::<i16>(device, config, on_data),
        SampleFormat::U16 => build_input::<u16>(device, config, on_data),
        SampleFormat::I32 => build_input::<i32>(device, config, on_data),
        SampleFormat::U8 => build_input::<u8>(device, config, on_data),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut on_data: InputCallback,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let format = InputFormat {
        channels: config.channels,
        sample_rate: config.sample_rate.0,
    };
    let mut converted: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|&s| f32::from_sample(s)));
            on_data(&converted, format);
        },
        |err| error!("Capture-Fehler: {}", err),
        None,
    )
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

struct ActiveCapture {
    input: Box<dyn ActiveInput>,
    meter: LevelMeter,
}

#[derive(Default)]
struct CaptureState {
    config: Option<CaptureConfig>,
    has_permission: bool,
    device_label: Option<String>,
    error: Option<String>,
    active: Option<ActiveCapture>,
}

/// Mikrofon-Aufnahme mit Pegelmessung
pub struct AudioCapture {
    microphone: Arc<dyn Microphone>,
    state: Mutex<CaptureState>,
    on_frame: Arc<RwLock<Option<FrameCallback>>>,
    level: LevelReading,
}

impl AudioCapture {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            state: Mutex::new(CaptureState::default()),
            on_frame: Arc::new(RwLock::new(None)),
            level: LevelReading::new(),
        }
    }

    /// Aufnahme ueber das cpal-Standardbackend
    pub fn cpal() -> Self {
        Self::new(Arc::new(CpalMicrophone))
    }

    /// Fragt den Mikrofon-Zugriff an. Gibt false zurueck und setzt den
    /// Fehlertext, wenn der Zugriff verweigert wird. Idempotent.
    pub fn request_permission(&self, config: CaptureConfig) -> bool {
        let result = config
            .validate()
            .and_then(|_| self.microphone.test_stream(&config));

        let mut state = self.state.lock();
        state.config = Some(config);
        match result {
            Ok(label) => {
                info!(geraet = %label, "Mikrofon-Zugriff erteilt");
                state.has_permission = true;
                state.device_label = Some(label);
                state.error = None;
                true
            }
            Err(e) => {
                warn!("Mikrofon-Zugriff fehlgeschlagen: {}", e);
                state.has_permission = false;
                state.device_label = None;
                state.error = Some(e.to_string());
                false
            }
        }
    }

    /// Startet die Aufnahme. Ohne erteilte Berechtigung schlaegt der Aufruf fehl.
    pub fn start_capture(&self) -> AudioResult<()> {
        let mut state = self.state.lock();
        if state.active.is_some() {
            debug!("Aufnahme laeuft bereits");
            return Ok(());
        }
        let config = match state.config.clone() {
            Some(config) if state.has_permission => config,
            _ => {
                state.error = Some(AudioError::KeineBerechtigung.to_string());
                return Err(AudioError::KeineBerechtigung);
            }
        };

        let (meter, meter_producer) =
            LevelMeter::start(self.level.clone(), config.sample_rate as usize)?;
        let on_data = frame_callback(&config, meter_producer, Arc::clone(&self.on_frame));

        match self.microphone.open(&config, on_data) {
            Ok(input) => {
                state.active = Some(ActiveCapture { input, meter });
                state.error = None;
                info!(
                    sample_rate = config.sample_rate,
                    buffer_size = config.buffer_size,
                    "Aufnahme gestartet"
                );
                Ok(())
            }
            Err(e) => {
                // Mess-Thread wieder freigeben
                drop(meter);
                error!("Aufnahme konnte nicht gestartet werden: {}", e);
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stoppt die Aufnahme und setzt den Pegel auf 0. Idempotent.
    pub fn stop_capture(&self) {
        // Stream ausserhalb des Locks stoppen: der Audio-Callback darf
        // waehrenddessen noch in den Frame-Callback laufen
        let active = self.state.lock().active.take();
        if let Some(mut active) = active {
            active.input.stop();
            active.meter.stop();
            info!("Aufnahme gestoppt");
        }
        self.level.set(0.0);
    }

    /// Registriert den Frame-Callback (ersetzt einen vorherigen)
    pub fn on_frame(&self, callback: impl Fn(AudioFrame) + Send + Sync + 'static) {
        *self.on_frame.write() = Some(Arc::new(callback));
    }

    /// Entfernt den Frame-Callback
    pub fn clear_on_frame(&self) {
        *self.on_frame.write() = None;
    }

    /// Aktueller Eingangspegel in `[0, 1]`
    pub fn level(&self) -> f32 {
        self.level.get()
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn has_permission(&self) -> bool {
        self.state.lock().has_permission
    }

    pub fn device_label(&self) -> Option<String> {
        self.state.lock().device_label.clone()
    }

    /// Letzter Fehlertext (Berechtigung oder Start)
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Baut den Audio-Pfad: Downmix -> Resampling -> Pegel -> Frames -> Pipeline -> Callback
fn frame_callback(
    config: &CaptureConfig,
    mut meter: MeterProducer,
    on_frame: Arc<RwLock<Option<FrameCallback>>>,
) -> InputCallback {
    let sample_rate = config.sample_rate;
    let mut pipeline = InputPipeline::for_capture(config);
    let mut assembler = FrameAssembler::new(config.buffer_size);
    let mut mono: Vec<f32> = Vec::with_capacity(config.buffer_size);
    let mut resampler: Option<StreamResampler> = None;
    let mut resampled: Vec<f32> = Vec::new();

    Box::new(move |data: &[f32], format: InputFormat| {
        downmix_into(data, format.channels, &mut mono);

        let samples: &[f32] = if format.sample_rate == sample_rate {
            &mono
        } else {
            if resampler.as_ref().map(StreamResampler::input_rate) != Some(format.sample_rate) {
                match StreamResampler::new(format.sample_rate, sample_rate, CAPTURE_BLOCK) {
                    Ok(r) => resampler = Some(r),
                    Err(e) => {
                        error!("Capture-Resampler nicht verfuegbar: {}", e);
                        return;
                    }
                }
            }
            resampled.clear();
            if let Some(r) = resampler.as_mut() {
                if let Err(e) = r.push(&mono, &mut resampled) {
                    warn!("Capture-Block verworfen: {}", e);
                    return;
                }
            }
            &resampled
        };

        // Volle Messpuffer verwerfen nur Messwerte, nie Audio
        let _ = meter.push_slice(samples);

        assembler.push(samples, |mut samples| {
            pipeline.process(&mut samples);
            let callback = on_frame.read().clone();
            if let Some(callback) = callback {
                callback(AudioFrame {
                    samples,
                    sample_rate,
                });
            }
        });
    })
}
