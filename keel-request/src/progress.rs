//! Byte-level transfer progress.

use std::time::Duration;

use tokio::time::Instant;

/// Default spacing between two emitted samples.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// One progress sample.
///
/// `total`, `percentage` and `eta` are `None` when the server did not declare
/// a usable length; such a sample only reports `received`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    /// Declared length of the bytes flowing through the meter.
    pub total: Option<u64>,
    /// Bytes seen so far.
    pub received: u64,
    /// Estimated time until `received == total`.
    pub eta: Option<Duration>,
    /// Completion in `0.0..=100.0`.
    pub percentage: Option<f64>,
}

impl ProgressState {
    /// Whether the length is unknown.
    pub fn is_indeterminate(&self) -> bool {
        self.total.is_none()
    }

    /// Whether every declared byte has been seen.
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.received >= total)
    }
}

/// Converts byte counts into throttled [`ProgressState`] samples.
///
/// The first chunk always produces a sample; after that at most one sample is
/// produced per interval. [`ProgressMeter::finish`] always produces one.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    total: Option<u64>,
    received: u64,
    interval: Duration,
    started: Instant,
    last_emit: Option<Instant>,
}

impl ProgressMeter {
    /// Create a meter for `total` bytes. A total of zero counts as unknown.
    pub fn new(total: Option<u64>, interval: Duration) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            received: 0,
            interval,
            started: Instant::now(),
            last_emit: None,
        }
    }

    /// Declared total, if usable.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Bytes recorded so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Record `len` more bytes and return a sample if one is due.
    pub fn record(&mut self, len: usize) -> Option<ProgressState> {
        self.received = self.received.saturating_add(len as u64);

        let now = Instant::now();
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return None;
        }

        self.last_emit = Some(now);
        Some(self.snapshot())
    }

    /// Final sample at end of body, regardless of throttling.
    pub fn finish(&mut self) -> ProgressState {
        self.last_emit = Some(Instant::now());
        self.snapshot()
    }

    /// Current state without affecting throttling.
    pub fn snapshot(&self) -> ProgressState {
        let Some(total) = self.total else {
            return ProgressState {
                total: None,
                received: self.received,
                eta: None,
                percentage: None,
            };
        };

        let percentage = (self.received as f64 / total as f64 * 100.0).min(100.0);
        let eta = (self.received > 0).then(|| {
            let remaining = total.saturating_sub(self.received) as f64;
            let elapsed = self.started.elapsed().as_secs_f64();
            Duration::from_secs_f64(elapsed * remaining / self.received as f64)
        });

        ProgressState {
            total: Some(total),
            received: self.received,
            eta,
            percentage: Some(percentage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_chunk_emits() {
        let mut meter = ProgressMeter::new(Some(1000), DEFAULT_PROGRESS_INTERVAL);
        let state = meter.record(100).unwrap();
        assert_eq!(state.total, Some(1000));
        assert_eq!(state.received, 100);
        assert_eq!(state.percentage, Some(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_are_throttled() {
        let mut meter = ProgressMeter::new(Some(1000), DEFAULT_PROGRESS_INTERVAL);
        assert!(meter.record(100).is_some());
        assert!(meter.record(100).is_none());

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(meter.record(100).is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        let state = meter.record(100).unwrap();
        assert_eq!(state.received, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_from_rate() {
        let mut meter = ProgressMeter::new(Some(1000), DEFAULT_PROGRESS_INTERVAL);
        tokio::time::advance(Duration::from_secs(1)).await;

        let state = meter.record(250).unwrap();
        assert_eq!(state.eta, Some(Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_length_is_indeterminate() {
        for total in [None, Some(0)] {
            let mut meter = ProgressMeter::new(total, DEFAULT_PROGRESS_INTERVAL);
            let state = meter.record(42).unwrap();
            assert!(state.is_indeterminate());
            assert_eq!(state.received, 42);
            assert!(state.percentage.is_none());
            assert!(state.eta.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_bypasses_throttle() {
        let mut meter = ProgressMeter::new(Some(200), DEFAULT_PROGRESS_INTERVAL);
        meter.record(100);
        assert!(meter.record(100).is_none());

        let state = meter.finish();
        assert!(state.is_complete());
        assert_eq!(state.percentage, Some(100.0));
        assert_eq!(state.eta, Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentage_is_clamped() {
        let mut meter = ProgressMeter::new(Some(10), DEFAULT_PROGRESS_INTERVAL);
        let state = meter.record(25).unwrap();
        assert_eq!(state.percentage, Some(100.0));
    }
}
