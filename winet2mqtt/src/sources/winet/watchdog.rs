use std::time::{Duration, Instant};

/// Scheduler invocations tolerated while a request is outstanding.
pub const MAX_SKIPPED_TICKS: u32 = 5;
/// Silence is tolerated for this many poll periods.
pub const SILENCE_PERIODS: u32 = 6;

/// Liveness checks for one connection: a request that never gets answered,
/// and a connection that stopped delivering frames altogether.
#[derive(Debug)]
pub struct Watchdog {
    silence_limit: Duration,
    skipped: u32,
    last_frame: Option<Instant>,
}

impl Watchdog {
    pub fn new(frequency: Duration) -> Self {
        Self {
            silence_limit: frequency * SILENCE_PERIODS,
            skipped: 0,
            last_frame: None,
        }
    }

    /// Starts the silence timer. Called when the transport opens.
    pub fn arm(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.last_frame.is_some()
    }

    pub fn frame_received(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }

    /// Counts a scheduler invocation that found a request in flight. Returns
    /// true once more than [`MAX_SKIPPED_TICKS`] happened in a row, and starts
    /// counting afresh.
    pub fn record_skip(&mut self) -> bool {
        self.skipped += 1;
        if self.skipped > MAX_SKIPPED_TICKS {
            self.skipped = 0;
            return true;
        }
        false
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn reset_skips(&mut self) {
        self.skipped = 0;
    }

    pub fn is_silent(&self, now: Instant) -> bool {
        self.last_frame
            .is_some_and(|last| now.saturating_duration_since(last) > self.silence_limit)
    }

    pub fn reset(&mut self) {
        self.skipped = 0;
        self.last_frame = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sixth_skip_trips() {
        let mut watchdog = Watchdog::new(Duration::from_secs(10));
        for _ in 0..MAX_SKIPPED_TICKS {
            assert!(!watchdog.record_skip());
        }
        assert!(watchdog.record_skip());
        assert_eq!(watchdog.skipped(), 0);
    }

    #[test]
    fn test_reply_resets_skips() {
        let mut watchdog = Watchdog::new(Duration::from_secs(10));
        for _ in 0..MAX_SKIPPED_TICKS {
            watchdog.record_skip();
        }
        watchdog.reset_skips();
        assert!(!watchdog.record_skip());
    }

    #[test]
    fn test_silence() {
        let mut watchdog = Watchdog::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(!watchdog.is_silent(start + Duration::from_secs(3600)));

        watchdog.arm(start);
        assert!(!watchdog.is_silent(start + Duration::from_secs(60)));
        assert!(watchdog.is_silent(start + Duration::from_secs(61)));

        watchdog.frame_received(start + Duration::from_secs(50));
        assert!(!watchdog.is_silent(start + Duration::from_secs(61)));

        watchdog.reset();
        assert!(!watchdog.is_armed());
    }
}
