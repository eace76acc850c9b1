//! Latenzmessung ueber Ping/Pong
//!
//! Hoechstens ein Ping ist offen. Ein neuer Ping ueberschreibt den
//! ausstehenden Zeitstempel; ein Pong ohne offenen Ping wird ignoriert.

use std::time::{Duration, Instant};

/// Standard-Intervall zwischen zwei Pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct PingTracker {
    pending: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merkt sich den Sendezeitpunkt eines Pings
    pub fn ping_sent(&mut self, now: Instant) {
        self.pending = Some(now);
    }

    /// Berechnet die Round-Trip-Zeit, falls ein Ping offen war
    pub fn pong_received(&mut self, now: Instant) -> Option<Duration> {
        let sent = self.pending.take()?;
        let rtt = now.saturating_duration_since(sent);
        self.last_rtt = Some(rtt);
        Some(rtt)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_aus_ping_und_pong() {
        let mut tracker = PingTracker::new();
        let t0 = Instant::now();
        tracker.ping_sent(t0);
        assert!(tracker.is_pending());

        let rtt = tracker.pong_received(t0 + Duration::from_millis(42)).unwrap();
        assert_eq!(rtt, Duration::from_millis(42));
        assert!(!tracker.is_pending());
        assert_eq!(tracker.last_rtt(), Some(rtt));
    }

    #[test]
    fn neuer_ping_ueberschreibt_alten() {
        let mut tracker = PingTracker::new();
        let t0 = Instant::now();
        tracker.ping_sent(t0);
        tracker.ping_sent(t0 + Duration::from_millis(100));
        let rtt = tracker.pong_received(t0 + Duration::from_millis(130)).unwrap();
        assert_eq!(rtt, Duration::from_millis(30));
    }

    #[test]
    fn pong_ohne_ping_wird_ignoriert() {
        let mut tracker = PingTracker::new();
        assert!(tracker.pong_received(Instant::now()).is_none());
        assert!(tracker.last_rtt().is_none());
    }
}
