//! Ausgabe-Uhr und cpal-Ausgabe
//!
//! [`Timeline`] ist eine sample-genaue Ausgabe-Uhr: Quellen werden auf einen
//! absoluten Zeitpunkt geplant und beim Rendern hineingemischt. Endet eine
//! Quelle mitten in einem Ausgabepuffer, wird bis exakt zu ihrem Ende
//! gerendert, der Lock freigegeben und erst dann ihr Ende-Handler
//! aufgerufen. Plant der Handler sofort die naechste Quelle, beginnt diese
//! ohne Luecke im selben Puffer.
//!
//! [`CpalPlaybackSink`] treibt eine Timeline aus einem cpal-OutputStream auf
//! einem eigenen Thread (cpal-Streams sind nicht `Send`). Laeuft das Geraet
//! mit einer anderen Rate als der Kanal, rendert [`OutputRenderer`] die
//! Timeline blockweise und wandelt auf die Geraete-Rate um.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::device::{device_label, load_cpal_output_device, pick_stream_config};
use crate::error::{AudioError, AudioResult};
use crate::playback::{ChunkEnded, PlaybackSink};
use crate::resample::{StreamResampler, OUTPUT_BLOCK};

thread_local! {
    /// Gesetzt, solange dieser Thread einen Ausgabe-Callback abarbeitet
    static IM_AUSGABE_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Fuehrt `f` als Ausgabe-Callback aus
fn im_ausgabe_callback<R>(f: impl FnOnce() -> R) -> R {
    IM_AUSGABE_CALLBACK.with(|flag| flag.set(true));
    let result = f();
    IM_AUSGABE_CALLBACK.with(|flag| flag.set(false));
    result
}

struct Source {
    start: u64,
    samples: Vec<f32>,
    on_ended: Option<ChunkEnded>,
}

impl Source {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

#[derive(Default)]
struct TimelineState {
    /// Bereits gerenderte Frames seit Erzeugung
    position: u64,
    paused: bool,
    sources: Vec<Source>,
}

impl TimelineState {
    /// Mischt alle Quellen ab `position` in `out` (vorher genullt)
    fn mix_into(&self, out: &mut [f32]) {
        out.fill(0.0);
        let seg_start = self.position;
        let seg_end = seg_start + out.len() as u64;
        for source in &self.sources {
            let from = source.start.max(seg_start);
            let to = source.end().min(seg_end);
            if from >= to {
                continue;
            }
            let src = &source.samples[(from - source.start) as usize..(to - source.start) as usize];
            let dst = &mut out[(from - seg_start) as usize..(to - seg_start) as usize];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        }
    }

    /// Entfernt beendete Quellen und gibt ihre Ende-Handler zurueck
    fn take_finished(&mut self) -> Vec<ChunkEnded> {
        let position = self.position;
        let mut handlers = Vec::new();
        self.sources.retain_mut(|source| {
            if source.end() <= position {
                if let Some(handler) = source.on_ended.take() {
                    handlers.push(handler);
                }
                false
            } else {
                true
            }
        });
        handlers
    }
}

/// Sample-genaue Ausgabe-Uhr (Mono)
pub struct Timeline {
    sample_rate: u32,
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            state: Mutex::new(TimelineState::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gerenderte Frames seit Start
    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    pub fn active_sources(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Rendert `out.len()` Frames. Waehrend der Pause steht die Uhr und
    /// es wird Stille ausgegeben.
    pub fn render(&self, out: &mut [f32]) {
        let mut offset = 0;
        while offset < out.len() {
            let (finished, advanced) = {
                let mut state = self.state.lock();
                if state.paused {
                    out[offset..].fill(0.0);
                    return;
                }
                let remaining = (out.len() - offset) as u64;
                let position = state.position;
                // Nur bis zum naechsten Quellen-Ende rendern
                let segment = state
                    .sources
                    .iter()
                    .map(Source::end)
                    .filter(|&end| end > position)
                    .min()
                    .map_or(remaining, |end| (end - position).min(remaining));

                let segment = segment as usize;
                state.mix_into(&mut out[offset..offset + segment]);
                state.position += segment as u64;
                (state.take_finished(), segment)
            };
            offset += advanced;

            for handler in finished {
                handler();
            }
        }
    }

    fn to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

impl PlaybackSink for Timeline {
    fn now(&self) -> f64 {
        self.position() as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, start: f64, on_ended: ChunkEnded) -> AudioResult<()> {
        let mut state = self.state.lock();
        // Nie in der Vergangenheit beginnen
        let start = self.to_frames(start).max(state.position);
        state.sources.push(Source {
            start,
            samples,
            on_ended: Some(on_ended),
        });
        Ok(())
    }

    fn stop_all(&self) {
        let dropped = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.sources)
        };
        if !dropped.is_empty() {
            debug!(quellen = dropped.len(), "Geplante Quellen verworfen");
        }
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn resume(&self) {
        self.state.lock().paused = false;
    }
}

// ---------------------------------------------------------------------------
// cpal
// ---------------------------------------------------------------------------

/// Lautsprecher-Ausgabe ueber cpal
pub struct CpalPlaybackSink {
    timeline: Arc<Timeline>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlaybackSink {
    /// Oeffnet den Ausgabe-Stream (None = Standardgeraet)
    pub fn open(sample_rate: u32, device_name: Option<&str>) -> AudioResult<Self> {
        let timeline = Arc::new(Timeline::new(sample_rate));
        let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device_name = device_name.map(str::to_string);
        let thread_timeline = Arc::clone(&timeline);

        let thread = std::thread::Builder::new()
            .name("werwolf-wiedergabe".to_string())
            .spawn(move || {
                let stream =
                    match open_output_stream(sample_rate, device_name.as_deref(), thread_timeline) {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Ausgabe-Stream freigegeben");
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                timeline,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Ausgabe-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn now(&self) -> f64 {
        self.timeline.now()
    }

    fn schedule(&self, samples: Vec<f32>, start: f64, on_ended: ChunkEnded) -> AudioResult<()> {
        self.timeline.schedule(samples, start, on_ended)
    }

    fn stop_all(&self) {
        self.timeline.stop_all();
    }

    fn pause(&self) {
        self.timeline.pause();
    }

    fn resume(&self) {
        self.timeline.resume();
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.timeline.stop_all();
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Der Stream-Thread wartet beim Freigeben auf genau diesen Callback
        if IM_AUSGABE_CALLBACK.with(Cell::get) {
            debug!("Ausgabe im eigenen Callback freigegeben, Thread laeuft allein aus");
            return;
        }
        if thread.join().is_err() {
            warn!("Ausgabe-Thread ist abgestuerzt");
        }
    }
}

/// Fuellt Geraete-Puffer aus der Timeline, bei Bedarf mit Umwandlung
/// von der Kanal-Rate auf die Geraete-Rate
pub struct OutputRenderer {
    timeline: Arc<Timeline>,
    resampler: Option<StreamResampler>,
    block: Vec<f32>,
    /// Umgewandelte, noch nicht ausgegebene Samples
    fifo: Vec<f32>,
}

impl OutputRenderer {
    pub fn new(timeline: Arc<Timeline>, device_rate: u32) -> AudioResult<Self> {
        let resampler = if device_rate == timeline.sample_rate() {
            None
        } else {
            Some(StreamResampler::new(
                timeline.sample_rate(),
                device_rate,
                OUTPUT_BLOCK,
            )?)
        };
        Ok(Self {
            timeline,
            resampler,
            block: Vec::new(),
            fifo: Vec::new(),
        })
    }

    /// Fuellt `out` komplett (Mono, Geraete-Rate)
    pub fn render(&mut self, out: &mut [f32]) {
        let Some(resampler) = self.resampler.as_mut() else {
            self.timeline.render(out);
            return;
        };

        while self.fifo.len() < out.len() {
            self.block.resize(resampler.block_size(), 0.0);
            self.timeline.render(&mut self.block);
            if let Err(e) = resampler.push(&self.block, &mut self.fifo) {
                error!("Ausgabe-Block verworfen: {}", e);
                break;
            }
        }

        let n = out.len().min(self.fifo.len());
        out[..n].copy_from_slice(&self.fifo[..n]);
        out[n..].fill(0.0);
        self.fifo.drain(..n);
    }
}

fn open_output_stream(
    sample_rate: u32,
    device_name: Option<&str>,
    timeline: Arc<Timeline>,
) -> AudioResult<Stream> {
    let device = load_cpal_output_device(device_name)?;
    let ranges = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    let supported = pick_stream_config(ranges, sample_rate).ok_or_else(|| {
        AudioError::Konfiguration("Ausgabegeraet bietet keine Konfiguration an".into())
    })?;
    let format = supported.sample_format();
    let config = supported.config();
    let renderer = OutputRenderer::new(timeline, config.sample_rate.0)?;

    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, renderer),
        SampleFormat::I16 => build_output::<i16>(&device, &config, renderer),
        SampleFormat::U16 => build_output::<u16>(&device, &config, renderer),
        SampleFormat::I32 => build_output::<i32>(&device, &config, renderer),
        other => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    info!(
        geraet = %device_label(&device),
        sample_rate,
        geraete_rate = config.sample_rate.0,
        kanaele = config.channels,
        "Ausgabe-Stream geoeffnet"
    );
    Ok(stream)
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut renderer: OutputRenderer,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            im_ausgabe_callback(|| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                renderer.render(&mut mono);
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    let value = T::from_sample(sample.clamp(-1.0, 1.0));
                    frame.fill(value);
                }
            })
        },
        |err| error!("Wiedergabe-Fehler: {}", err),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn zaehler() -> (Arc<AtomicUsize>, ChunkEnded) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn quelle_startet_exakt() {
        let timeline = Timeline::new(100);
        let (_, handler) = zaehler();
        timeline.schedule(vec![1.0; 5], 0.03, handler).unwrap();

        let mut out = vec![9.0f32; 10];
        timeline.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(timeline.position(), 10);
    }

    #[test]
    fn ende_handler_feuert_einmal() {
        let timeline = Timeline::new(100);
        let (count, handler) = zaehler();
        timeline.schedule(vec![0.5; 4], 0.0, handler).unwrap();

        let mut out = vec![0.0f32; 3];
        timeline.render(&mut out);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        timeline.render(&mut out);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        timeline.render(&mut out);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timeline.active_sources(), 0);
    }

    #[test]
    fn handler_kann_lueckenlos_nachplanen() {
        let timeline = Arc::new(Timeline::new(100));
        let tl = Arc::clone(&timeline);
        timeline
            .schedule(
                vec![0.25; 3],
                0.0,
                Box::new(move || {
                    let start = tl.now();
                    tl.schedule(vec![0.75; 3], start, Box::new(|| {})).unwrap();
                }),
            )
            .unwrap();

        let mut out = vec![0.0f32; 8];
        timeline.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn pause_friert_uhr_ein() {
        let timeline = Timeline::new(100);
        let (count, handler) = zaehler();
        timeline.schedule(vec![1.0; 4], 0.0, handler).unwrap();

        let mut out = vec![0.0f32; 2];
        timeline.render(&mut out);
        timeline.pause();
        timeline.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0]);
        assert_eq!(timeline.position(), 2);

        timeline.resume();
        timeline.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_all_verwirft_ohne_handler() {
        let timeline = Timeline::new(100);
        let (count, handler) = zaehler();
        timeline.schedule(vec![1.0; 4], 0.0, handler).unwrap();
        timeline.stop_all();

        let mut out = vec![0.0f32; 8];
        timeline.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn renderer_wandelt_auf_geraete_rate() {
        let timeline = Arc::new(Timeline::new(24_000));
        let (count, handler) = zaehler();
        timeline.schedule(vec![0.5; 2400], 0.0, handler).unwrap();

        let mut renderer = OutputRenderer::new(Arc::clone(&timeline), 48_000).unwrap();
        let mut gesamt = Vec::new();
        let mut puffer = vec![9.0f32; 480];
        for _ in 0..20 {
            renderer.render(&mut puffer);
            gesamt.extend_from_slice(&puffer);
        }

        // Jeder Geraete-Puffer wird vollstaendig gefuellt
        assert_eq!(gesamt.len(), 9600);
        // 100 ms Kanal-Audio ergeben ~4800 Geraete-Samples mit Pegel 0.5
        let hoerbar = gesamt.iter().filter(|s| s.abs() > 0.25).count();
        assert!(hoerbar.abs_diff(4800) < 300, "{} Samples", hoerbar);
        assert!(gesamt[2400..4000].iter().all(|s| (s - 0.5).abs() < 0.02));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn renderer_ohne_umwandlung_reicht_durch() {
        let timeline = Arc::new(Timeline::new(100));
        timeline.schedule(vec![1.0; 3], 0.0, Box::new(|| {})).unwrap();
        let mut renderer = OutputRenderer::new(Arc::clone(&timeline), 100).unwrap();
        let mut out = vec![0.0f32; 5];
        renderer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(timeline.position(), 5);
    }

    #[test]
    fn drop_im_ausgabe_callback_blockiert_nicht() {
        // Stream-Thread, der wie cpal beim Freigeben auf den laufenden Callback wartet
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (callback_fertig_tx, callback_fertig_rx) = bounded::<()>(1);
        let thread = std::thread::spawn(move || {
            let _ = stop_rx.recv();
            let _ = callback_fertig_rx.recv();
        });
        let sink = CpalPlaybackSink {
            timeline: Arc::new(Timeline::new(100)),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };

        let (fertig_tx, fertig_rx) = bounded::<()>(1);
        std::thread::spawn(move || {
            im_ausgabe_callback(|| drop(sink));
            let _ = fertig_tx.send(());
        });

        assert!(
            fertig_rx.recv_timeout(std::time::Duration::from_secs(2)).is_ok(),
            "Drop im Callback hat auf den Stream-Thread gewartet"
        );
        callback_fertig_tx.send(()).unwrap();
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn cpal_ausgabe_oeffnen() {
        let sink = CpalPlaybackSink::open(24_000, None).expect("Ausgabe sollte oeffenbar sein");
        assert_eq!(sink.timeline().sample_rate(), 24_000);
    }
}
