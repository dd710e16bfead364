//! Round-trip latency histogram using HdrHistogram
//!
//! Samples are the time between a unit being bound to a worker and its
//! RESULT being accepted, recorded with microsecond resolution.
//!
//! # Example
//!
//! ```
//! use rowfarm::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_millis(3));
//! hist.record(Duration::from_millis(5));
//!
//! assert_eq!(hist.len(), 2);
//! assert!(hist.percentile(50.0).is_some());
//! ```

use hdrhistogram::Histogram;
use std::time::Duration;

/// One hour, in microseconds
const MAX_MICROS: u64 = 3_600_000_000;

/// Latency histogram wrapper
///
/// Tracks 1µs to 1 hour with 3 significant digits. Values outside that
/// range are clamped.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_MICROS, 3)
            .expect("Failed to create histogram with valid bounds");
        Self { histogram }
    }

    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(MAX_MICROS);
        let _ = self.histogram.record(micros.clamp(1, MAX_MICROS));
    }

    /// Value at `percentile` (0.0 - 100.0), or None if nothing was recorded
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_micros(
            self.histogram.value_at_percentile(percentile),
        ))
    }

    pub fn max(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_micros(self.histogram.max()))
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
