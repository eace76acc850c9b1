//! Pegelmessung fuer die UI
//!
//! Der Capture-Callback schiebt Samples lock-free in einen Ring-Buffer.
//! Ein eigener Thread liest ihn mit ca. 60 Hz aus, berechnet den RMS ueber
//! ein gleitendes Analysefenster und legt das Ergebnis atomar ab. Der
//! Audio-Pfad wartet dabei nie auf den Mess-Thread.
//!
//! Der RMS wird direkt im Zeitbereich gebildet. Nach Parseval ist die
//! Energie eines Fensters im Zeit- und Frequenzbereich bis auf den
//! Normierungsfaktor der DFT gleich (`sum |x[n]|^2 = 1/N * sum |X[k]|^2`),
//! eine FFT ueber das Fenster wuerde also denselben Pegel liefern.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, trace, warn};

use crate::error::{AudioError, AudioResult};

/// Mess-Intervall (~60 Hz)
pub const METER_INTERVAL: Duration = Duration::from_millis(16);

/// Groesse des Analysefensters in Samples
pub const ANALYSIS_WINDOW: usize = 2048;

/// Produzent-Seite fuer den Audio-Callback
pub type MeterProducer = HeapProd<f32>;

/// Aktueller Pegel in `[0, 1]`, von beliebigen Threads lesbar
#[derive(Debug, Clone, Default)]
pub struct LevelReading {
    bits: Arc<AtomicU32>,
}

impl LevelReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// RMS ueber das Analysefenster, begrenzt auf `[0, 1]`
pub fn window_rms<'a>(samples: impl ExactSizeIterator<Item = &'a f32>) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f32 = samples.map(|s| s * s).sum();
    (sum_sq / n as f32).sqrt().min(1.0)
}

/// Laufender Mess-Thread
///
/// Wird beim Stoppen (oder Drop) beendet; der Pegel faellt dann auf 0.
pub struct LevelMeter {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    level: LevelReading,
}

impl LevelMeter {
    /// Startet den Mess-Thread und gibt den Producer fuer den Audio-Callback zurueck
    pub fn start(level: LevelReading, capacity: usize) -> AudioResult<(Self, MeterProducer)> {
        let rb = HeapRb::<f32>::new(capacity.max(ANALYSIS_WINDOW));
        let (producer, consumer) = rb.split();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_level = level.clone();
        let thread = std::thread::Builder::new()
            .name("werwolf-pegel".to_string())
            .spawn(move || {
                meter_loop(consumer, thread_level, || {
                    matches!(
                        stop_rx.recv_timeout(METER_INTERVAL),
                        Err(RecvTimeoutError::Timeout)
                    )
                });
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        debug!("Pegelmessung gestartet");
        Ok((
            Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                level,
            },
            producer,
        ))
    }

    /// Beendet den Mess-Thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Pegel-Thread ist abgestuerzt");
            }
        }
        self.level.set(0.0);
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Liest bei jedem Tick alle neuen Samples und aktualisiert den Pegel.
/// `tick` blockiert bis zum naechsten Intervall und liefert false zum Beenden.
fn meter_loop(mut consumer: HeapCons<f32>, level: LevelReading, mut tick: impl FnMut() -> bool) {
    let mut window: VecDeque<f32> = VecDeque::with_capacity(ANALYSIS_WINDOW);
    let mut scratch = vec![0.0f32; ANALYSIS_WINDOW];

    while tick() {
        loop {
            let n = consumer.pop_slice(&mut scratch);
            if n == 0 {
                break;
            }
            window.extend(&scratch[..n]);
        }
        let excess = window.len().saturating_sub(ANALYSIS_WINDOW);
        window.drain(..excess);

        let rms = window_rms(window.iter());
        level.set(rms);
        trace!(pegel = rms, "Pegel aktualisiert");
    }
}
