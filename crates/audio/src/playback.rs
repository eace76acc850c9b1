//! Lueckenlose Wiedergabe eingehender Audio-Chunks
//!
//! Eingehende PCM16-Payloads werden dekodiert und in eine nach Dauer
//! begrenzte Queue gelegt. Der Scheduler plant immer genau einen Chunk auf
//! der Ausgabe-Uhr:
//!
//! ```text
//! start          = max(now, next_play_time)
//! next_play_time = start + duration
//! ```
//!
//! Endet ein Chunk, wird der naechste geholt. Ohne Unterlauf beginnt B
//! damit exakt bei `A.start + A.duration`.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use werwolf_protocol::pcm::{dauer_sekunden, decode_pcm16};

use crate::error::{AudioError, AudioResult};
use crate::output::CpalPlaybackSink;

/// Konfiguration der Wiedergabe
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Abtastrate der eingehenden PCM16-Daten in Hz
    pub sample_rate: u32,
    /// Obergrenze der Queue in Sekunden (nicht in Chunks)
    pub max_queue_duration: f64,
    /// Name (oder Namensteil) des Ausgabegeraets, None = Standard
    pub device_name: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            max_queue_duration: 30.0,
            device_name: None,
        }
    }
}

/// Ein dekodierter Audio-Chunk
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    pub samples: Vec<f32>,
    /// Dauer in Sekunden
    pub duration: f64,
    pub speaker: Option<String>,
}

impl PlaybackChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, speaker: Option<String>) -> Self {
        let duration = dauer_sekunden(samples.len(), sample_rate);
        Self {
            samples,
            duration,
            speaker,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

/// FIFO-Queue, begrenzt durch die Summe der Chunk-Dauern.
///
/// Gezaehlt wird in Samples, damit die Grenze ohne Rundungsfehler gilt.
/// Beim Einfuegen werden die aeltesten Chunks verdraengt, nie der neue.
#[derive(Debug)]
pub struct PlaybackQueue {
    chunks: VecDeque<PlaybackChunk>,
    sample_rate: u32,
    max_samples: usize,
    queued_samples: usize,
}

impl PlaybackQueue {
    pub fn new(sample_rate: u32, max_queue_duration: f64) -> Self {
        let max_samples = (max_queue_duration.max(0.0) * sample_rate as f64).floor() as usize;
        Self {
            chunks: VecDeque::new(),
            sample_rate,
            max_samples,
            queued_samples: 0,
        }
    }

    /// Fuegt einen Chunk hinten an und gibt die Anzahl verdraengter Chunks zurueck.
    ///
    /// Ist der Chunk allein schon laenger als die Obergrenze, bleibt nur sein
    /// juengster Teil erhalten.
    pub fn push(&mut self, mut chunk: PlaybackChunk) -> usize {
        let mut evicted = 0;

        if chunk.samples.len() > self.max_samples {
            let excess = chunk.samples.len() - self.max_samples;
            chunk.samples.drain(..excess);
            chunk.duration = dauer_sekunden(chunk.samples.len(), self.sample_rate);
            warn!(
                verworfen = excess,
                "Chunk laenger als die Queue-Obergrenze, Anfang gekuerzt"
            );
        }

        while self.queued_samples + chunk.samples.len() > self.max_samples {
            match self.chunks.pop_front() {
                Some(old) => {
                    self.queued_samples -= old.samples.len();
                    evicted += 1;
                }
                None => break,
            }
        }

        self.queued_samples += chunk.samples.len();
        self.chunks.push_back(chunk);
        evicted
    }

    pub fn pop(&mut self) -> Option<PlaybackChunk> {
        let chunk = self.chunks.pop_front()?;
        self.queued_samples -= chunk.samples.len();
        Some(chunk)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.queued_samples = 0;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Summe der Dauern in Sekunden
    pub fn duration(&self) -> f64 {
        dauer_sekunden(self.queued_samples, self.sample_rate)
    }

    pub fn max_duration(&self) -> f64 {
        dauer_sekunden(self.max_samples, self.sample_rate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaybackChunk> {
        self.chunks.iter()
    }
}

// ---------------------------------------------------------------------------
// Ausgabe-Schnittstelle
// ---------------------------------------------------------------------------

/// Wird aufgerufen, sobald das letzte Sample einer Quelle ausgegeben wurde
pub type ChunkEnded = Box<dyn FnOnce() + Send>;

/// Ausgabe mit eigener Uhr
///
/// `on_ended` darf nie innerhalb von `schedule` selbst aufgerufen werden.
pub trait PlaybackSink: Send + Sync {
    /// Aktuelle Zeit der Ausgabe-Uhr in Sekunden
    fn now(&self) -> f64;

    /// Plant Samples exakt ab `start` (Sekunden auf der Ausgabe-Uhr)
    fn schedule(&self, samples: Vec<f32>, start: f64, on_ended: ChunkEnded) -> AudioResult<()>;

    /// Bricht alle geplanten Quellen ab, ohne ihre Ende-Handler aufzurufen
    fn stop_all(&self);

    /// Haelt die Uhr an; geplante Startzeiten bleiben unveraendert
    fn pause(&self);

    fn resume(&self);
}

// ---------------------------------------------------------------------------
// AudioPlayback
// ---------------------------------------------------------------------------

/// Momentaufnahme fuer die UI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_speaker: Option<String>,
    pub queued_chunks: usize,
    /// Sekunden
    pub queued_duration: f64,
    pub last_error: Option<String>,
}

type SpeakerCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;
type FinishedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct PlaybackCallbacks {
    on_speaker_change: Option<SpeakerCallback>,
    on_playback_finished: Option<FinishedCallback>,
}

struct SchedulerState {
    queue: PlaybackQueue,
    next_play_time: f64,
    /// Ein Chunk ist geplant und noch nicht beendet
    is_processing: bool,
    is_paused: bool,
    current_speaker: Option<String>,
    last_error: Option<String>,
    /// Wird bei jedem Stop erhoeht; Ende-Handler aelterer Generationen verfallen
    generation: u64,
}

/// Benachrichtigungen, die nach dem Freigeben des Locks zugestellt werden
enum Event {
    SpeakerChanged(Option<String>),
    Finished,
}

struct PlaybackInner {
    config: PlaybackConfig,
    sink: Arc<dyn PlaybackSink>,
    state: Mutex<SchedulerState>,
    callbacks: RwLock<PlaybackCallbacks>,
}

/// Wiedergabe mit lueckenlosem Scheduler
pub struct AudioPlayback {
    inner: Arc<PlaybackInner>,
}

impl AudioPlayback {
    pub fn new(config: PlaybackConfig, sink: Arc<dyn PlaybackSink>) -> Self {
        let queue = PlaybackQueue::new(config.sample_rate, config.max_queue_duration);
        Self {
            inner: Arc::new(PlaybackInner {
                config,
                sink,
                state: Mutex::new(SchedulerState {
                    queue,
                    next_play_time: 0.0,
                    is_processing: false,
                    is_paused: false,
                    current_speaker: None,
                    last_error: None,
                    generation: 0,
                }),
                callbacks: RwLock::new(PlaybackCallbacks::default()),
            }),
        }
    }

    /// Wiedergabe ueber cpal (Geraet aus der Konfiguration)
    pub fn cpal(config: PlaybackConfig) -> AudioResult<Self> {
        let sink = CpalPlaybackSink::open(config.sample_rate, config.device_name.as_deref())?;
        Ok(Self::new(config, Arc::new(sink)))
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    /// Dekodiert PCM16 und reiht den Chunk ein.
    ///
    /// Ein fehlerhafter Payload wird als Fehlertext vermerkt und verworfen;
    /// die Wiedergabe laeuft weiter.
    pub fn queue_audio(&self, raw: &[u8], speaker: Option<&str>) -> AudioResult<()> {
        if raw.is_empty() {
            return Ok(());
        }

        let samples = match decode_pcm16(raw) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Audio-Chunk verworfen: {}", e);
                self.inner.state.lock().last_error = Some(e.to_string());
                return Err(AudioError::DekodierFehler(e.to_string()));
            }
        };

        let chunk = PlaybackChunk::new(
            samples,
            self.inner.config.sample_rate,
            speaker.map(str::to_string),
        );
        self.queue_chunk(chunk);
        Ok(())
    }

    /// Reiht einen bereits dekodierten Chunk ein
    pub fn queue_chunk(&self, chunk: PlaybackChunk) {
        {
            let mut state = self.inner.state.lock();
            let evicted = state.queue.push(chunk);
            if evicted > 0 {
                debug!(
                    verdraengt = evicted,
                    queue_sek = state.queue.duration(),
                    "Queue voll, aelteste Chunks verworfen"
                );
            }
        }
        process_queue(&self.inner);
    }

    /// Stoppt die aktive Quelle, leert die Queue und setzt Cursor und
    /// Sprecher zurueck. Idempotent.
    pub fn stop_playback(&self) {
        let speaker_reset = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.queue.clear();
            state.is_processing = false;
            state.next_play_time = 0.0;
            // Unter dem Lock, damit kein paralleles queue_audio dazwischen plant
            self.inner.sink.stop_all();
            state.current_speaker.take().is_some()
        };
        if speaker_reset {
            emit(&self.inner, vec![Event::SpeakerChanged(None)]);
        }
        debug!("Wiedergabe gestoppt");
    }

    /// Haelt die Ausgabe-Uhr an. Geplante Chunks behalten ihre Startzeit.
    pub fn pause_playback(&self) {
        let mut state = self.inner.state.lock();
        if !state.is_paused {
            self.inner.sink.pause();
            state.is_paused = true;
            info!("Wiedergabe pausiert");
        }
    }

    pub fn resume_playback(&self) {
        let mut state = self.inner.state.lock();
        if state.is_paused {
            self.inner.sink.resume();
            state.is_paused = false;
            info!("Wiedergabe fortgesetzt");
        }
    }

    /// Registriert den Sprecherwechsel-Callback (ersetzt einen vorherigen)
    pub fn on_speaker_change(&self, callback: impl Fn(Option<String>) + Send + Sync + 'static) {
        self.inner.callbacks.write().on_speaker_change = Some(Arc::new(callback));
    }

    /// Registriert den Callback fuer eine leergelaufene Queue (ersetzt einen vorherigen)
    pub fn on_playback_finished(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.callbacks.write().on_playback_finished = Some(Arc::new(callback));
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.inner.state.lock();
        PlaybackStatus {
            is_playing: state.is_processing,
            is_paused: state.is_paused,
            current_speaker: state.current_speaker.clone(),
            queued_chunks: state.queue.len(),
            queued_duration: state.queue.duration(),
            last_error: state.last_error.clone(),
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

/// Plant den naechsten Chunk, falls gerade keiner laeuft
fn process_queue(inner: &Arc<PlaybackInner>) {
    let mut events = Vec::new();
    {
        let mut state = inner.state.lock();
        if state.is_processing {
            return;
        }

        while let Some(chunk) = state.queue.pop() {
            if chunk.speaker.is_some() && chunk.speaker != state.current_speaker {
                state.current_speaker = chunk.speaker.clone();
                events.push(Event::SpeakerChanged(chunk.speaker.clone()));
            }

            let start = inner.sink.now().max(state.next_play_time);
            let generation = state.generation;
            let weak = Arc::downgrade(inner);
            let on_ended: ChunkEnded =
                Box::new(move || chunk_ended(&weak, generation));

            match inner.sink.schedule(chunk.samples, start, on_ended) {
                Ok(()) => {
                    state.is_processing = true;
                    state.next_play_time = start + chunk.duration;
                    break;
                }
                Err(e) => {
                    // Naechsten Chunk versuchen, die Pipeline bleibt aktiv
                    warn!("Chunk konnte nicht geplant werden: {}", e);
                    state.last_error = Some(e.to_string());
                }
            }
        }
    }
    emit(inner, events);
}

fn chunk_ended(weak: &Weak<PlaybackInner>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let drained = {
        let mut state = inner.state.lock();
        if state.generation != generation {
            return;
        }
        state.is_processing = false;
        state.queue.is_empty()
    };

    if drained {
        emit(&inner, vec![Event::Finished]);
    }
    process_queue(&inner);
}

/// Stellt Benachrichtigungen ausserhalb aller internen Locks zu
fn emit(inner: &PlaybackInner, events: Vec<Event>) {
    if events.is_empty() {
        return;
    }
    let (on_speaker, on_finished) = {
        let callbacks = inner.callbacks.read();
        (
            callbacks.on_speaker_change.clone(),
            callbacks.on_playback_finished.clone(),
        )
    };
    for event in events {
        match event {
            Event::SpeakerChanged(speaker) => {
                debug!(sprecher = ?speaker, "Sprecherwechsel");
                if let Some(cb) = &on_speaker {
                    cb(speaker);
                }
            }
            Event::Finished => {
                debug!("Wiedergabe-Queue leer");
                if let Some(cb) = &on_finished {
                    cb();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Timeline;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use werwolf_protocol::pcm::encode_pcm16;

    const RATE: u32 = 100;

    /// Timeline, die zusaetzlich alle Startzeiten mitschreibt
    struct RecordingSink {
        timeline: Timeline,
        starts: Mutex<Vec<(f64, usize)>>,
        fail: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                timeline: Timeline::new(RATE),
                starts: Mutex::new(Vec::new()),
                fail: Mutex::new(false),
            })
        }

        fn render(&self, frames: usize) -> Vec<f32> {
            let mut out = vec![0.0; frames];
            self.timeline.render(&mut out);
            out
        }
    }

    impl PlaybackSink for RecordingSink {
        fn now(&self) -> f64 {
            self.timeline.now()
        }

        fn schedule(&self, samples: Vec<f32>, start: f64, on_ended: ChunkEnded) -> AudioResult<()> {
            if *self.fail.lock() {
                return Err(AudioError::StreamFehler("Ausgabe weg".into()));
            }
            self.starts.lock().push((start, samples.len()));
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

    fn config(max_queue_duration: f64) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: RATE,
            max_queue_duration,
            device_name: None,
        }
    }

    fn chunk(sekunden: f64, wert: f32) -> PlaybackChunk {
        let n = (sekunden * RATE as f64) as usize;
        PlaybackChunk::new(vec![wert; n], RATE, None)
    }

    fn pcm(n: usize, wert: f32) -> Vec<u8> {
        encode_pcm16(&vec![wert; n]).to_vec()
    }

    #[test]
    fn queue_haelt_nur_die_juengsten_zwoelf_sekunden() {
        let mut queue = PlaybackQueue::new(RATE, 12.0);
        for i in 0..5 {
            queue.push(chunk(5.0, i as f32));
            assert!(queue.duration() <= 12.0);
        }
        assert_eq!(queue.len(), 2);
        assert!((queue.duration() - 10.0).abs() < 1e-9);
        let werte: Vec<f32> = queue.iter().map(|c| c.samples[0]).collect();
        assert_eq!(werte, vec![3.0, 4.0]);
    }

    #[test]
    fn gemischte_chunk_groessen_bleiben_unter_der_grenze() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(12.0), sink.clone());
        let folge = [(0.3, 0.1), (7.0, 0.2), (0.01, 0.3), (11.9, 0.4), (2.5, 0.5), (12.5, 0.6)];
        let erwartet: [&[f32]; 6] = [&[], &[0.2], &[0.2, 0.3], &[0.3, 0.4], &[0.5], &[0.6]];

        for (i, &(sekunden, wert)) in folge.iter().enumerate() {
            let n = (sekunden * RATE as f64).round() as usize;
            playback.queue_audio(&pcm(n, wert), None).unwrap();
            assert!(playback.status().queued_duration <= 12.0 + 1e-9);

            // Ueberlebende sind die juengsten Chunks in Ankunftsreihenfolge
            let werte: Vec<f32> = {
                let state = playback.inner.state.lock();
                state.queue.iter().map(|c| c.samples[0]).collect()
            };
            assert_eq!(werte.len(), erwartet[i].len(), "nach Aufruf {}", i);
            for (ist, soll) in werte.iter().zip(erwartet[i]) {
                assert!((ist - soll).abs() < 1e-3, "nach Aufruf {}: {:?}", i, werte);
            }
        }

        // Der laufende Chunk wird nie verdraengt
        assert_eq!(sink.starts.lock().len(), 1);
        assert!((playback.status().queued_duration - 12.0).abs() < 1e-9);
    }

    #[test]
    fn queue_kuerzt_uebergrossen_chunk() {
        let mut queue = PlaybackQueue::new(RATE, 1.0);
        queue.push(chunk(0.5, 1.0));
        let mut gross = chunk(3.0, 0.0);
        for (i, s) in gross.samples.iter_mut().enumerate() {
            *s = i as f32;
        }
        assert_eq!(queue.push(gross), 1);
        assert_eq!(queue.len(), 1);
        let rest = queue.pop().unwrap();
        assert_eq!(rest.samples.len(), 100);
        assert_eq!(rest.samples[0], 200.0);
        assert!((rest.duration - 1.0).abs() < 1e-9);
        assert_eq!(queue.duration(), 0.0);
    }

    #[test]
    fn lueckenlose_planung() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());

        playback.queue_audio(&pcm(30, 0.25), Some("Alice")).unwrap();
        playback.queue_audio(&pcm(20, 0.5), Some("Alice")).unwrap();
        // Nur der erste Chunk ist geplant, der zweite wartet
        assert_eq!(sink.starts.lock().len(), 1);
        assert_eq!(playback.status().queued_chunks, 1);

        let out = sink.render(60);
        let starts = sink.starts.lock().clone();
        assert_eq!(starts.len(), 2);
        let (a_start, a_len) = starts[0];
        let (b_start, _) = starts[1];
        assert!((b_start - (a_start + a_len as f64 / RATE as f64)).abs() < 1e-9);

        assert!(out[..30].iter().all(|s| (s - 0.25).abs() < 1e-4));
        assert!(out[30..50].iter().all(|s| (s - 0.5).abs() < 1e-4));
        assert!(out[50..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn start_nach_unterlauf_ist_jetzt() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());

        playback.queue_audio(&pcm(10, 0.1), None).unwrap();
        sink.render(25);
        playback.queue_audio(&pcm(10, 0.1), None).unwrap();

        let starts = sink.starts.lock().clone();
        assert!((starts[1].0 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn sprecherwechsel_nur_bei_aenderung() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());
        let wechsel = Arc::new(Mutex::new(Vec::new()));
        let w = Arc::clone(&wechsel);
        playback.on_speaker_change(move |s| w.lock().push(s));

        playback.queue_audio(&pcm(5, 0.1), Some("A")).unwrap();
        playback.queue_audio(&pcm(5, 0.1), Some("A")).unwrap();
        playback.queue_audio(&pcm(5, 0.1), None).unwrap();
        playback.queue_audio(&pcm(5, 0.1), Some("B")).unwrap();
        sink.render(40);

        assert_eq!(
            *wechsel.lock(),
            vec![Some("A".to_string()), Some("B".to_string())]
        );
        assert_eq!(playback.status().current_speaker.as_deref(), Some("B"));
    }

    #[test]
    fn fehlerhafter_payload_haelt_nichts_an() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());

        assert!(matches!(
            playback.queue_audio(&[1, 2, 3], Some("A")),
            Err(AudioError::DekodierFehler(_))
        ));
        assert!(playback.status().last_error.is_some());

        playback.queue_audio(&pcm(10, 0.2), Some("A")).unwrap();
        assert!(playback.status().is_playing);
    }

    #[test]
    fn planungsfehler_setzt_processing_zurueck() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());

        *sink.fail.lock() = true;
        playback.queue_audio(&pcm(10, 0.2), None).unwrap();
        let status = playback.status();
        assert!(!status.is_playing);
        assert_eq!(status.last_error.as_deref(), Some("Stream-Fehler: Ausgabe weg"));

        *sink.fail.lock() = false;
        playback.queue_audio(&pcm(10, 0.2), None).unwrap();
        assert!(playback.status().is_playing);
    }

    #[test]
    fn stop_leert_queue_und_ignoriert_alte_enden() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());
        let fertig = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fertig);
        playback.on_playback_finished(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        playback.queue_audio(&pcm(10, 0.3), Some("A")).unwrap();
        playback.queue_audio(&pcm(10, 0.3), Some("A")).unwrap();
        playback.stop_playback();
        playback.stop_playback();

        let status = playback.status();
        assert!(!status.is_playing);
        assert_eq!(status.queued_chunks, 0);
        assert_eq!(status.current_speaker, None);

        let out = sink.render(30);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(fertig.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn queue_leer_meldet_ende() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());
        let fertig = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fertig);
        playback.on_playback_finished(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        playback.queue_audio(&pcm(10, 0.3), None).unwrap();
        playback.queue_audio(&pcm(10, 0.3), None).unwrap();
        sink.render(30);
        assert_eq!(fertig.load(Ordering::SeqCst), 1);
        assert!(!playback.status().is_playing);
    }

    #[test]
    fn nachschub_aus_ende_callback() {
        let sink = RecordingSink::new();
        let playback = Arc::new(AudioPlayback::new(config(30.0), sink.clone()));
        let weak = Arc::downgrade(&playback);
        let runden = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runden);
        playback.on_playback_finished(move || {
            if r.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(p) = weak.upgrade() {
                    p.queue_audio(&pcm(10, 0.7), None).unwrap();
                }
            }
        });

        playback.queue_audio(&pcm(10, 0.3), None).unwrap();
        let out = sink.render(30);
        assert_eq!(sink.starts.lock().len(), 2);
        assert!((out[10] - 0.7).abs() < 1e-4);
        assert_eq!(runden.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn letzte_referenz_im_ende_handler() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());
        let halter: Arc<Mutex<Option<AudioPlayback>>> = Arc::new(Mutex::new(None));
        let h = Arc::clone(&halter);
        playback.on_playback_finished(move || {
            let letzte = h.lock().take();
            drop(letzte);
        });

        playback.queue_audio(&pcm(10, 0.3), None).unwrap();
        *halter.lock() = Some(playback);
        sink.render(20);

        // Die Wiedergabe ist auf dem Render-Thread komplett abgebaut
        assert!(halter.lock().is_none());
        assert_eq!(Arc::strong_count(&sink), 1);
        assert_eq!(sink.timeline.active_sources(), 0);
    }

    #[test]
    fn pause_friert_planung_ein() {
        let sink = RecordingSink::new();
        let playback = AudioPlayback::new(config(30.0), sink.clone());

        playback.queue_audio(&pcm(20, 0.4), None).unwrap();
        sink.render(10);
        playback.pause_playback();
        assert!(playback.status().is_paused);
        let stille = sink.render(50);
        assert!(stille.iter().all(|s| *s == 0.0));

        playback.resume_playback();
        let rest = sink.render(10);
        assert!(rest.iter().all(|s| (s - 0.4).abs() < 1e-4));
        assert_eq!(sink.starts.lock().len(), 1);
    }
}
