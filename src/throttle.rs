//! Progress rate limiting
//!
//! The ProgressThrottle sits between many parallel producers and the single
//! consumer loop. Producers call [`ProgressThrottle::admit`] after every unit of
//! work; only calls that keep the delivery rate under the ceiling get through.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress callback shared by the workers of one operation (percent 0 to 100)
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Sentinel for "nothing delivered yet"
const NEVER: u64 = u64::MAX;

/// Rate ceiling for progress notifications, shared by all workers of one operation
///
/// # Algorithm
///
/// - The time since the last *delivered* call gives an instantaneous rate
///   (1 / delta)
/// - A call whose rate would exceed `max_per_sec` is dropped, not queued
/// - 100% is always delivered, exactly once, and closes the throttle so no
///   lower percentage can arrive after it
///
/// # Implementation
///
/// Lock-free: the last delivery timestamp is an AtomicU64 claimed by
/// compare-exchange, so two workers racing past the interval deliver once.
#[derive(Clone, Debug)]
pub struct ProgressThrottle {
    /// Smallest gap between deliveries (1 / ceiling)
    min_interval_nanos: u64,
    /// Last delivery timestamp (nanoseconds since arbitrary epoch), NEVER if none
    last_delivery: Arc<AtomicU64>,
    /// Set once 100% has been delivered
    finished: Arc<AtomicBool>,
}

impl ProgressThrottle {
    /// Create a throttle allowing at most `max_per_sec` deliveries per second
    ///
    /// # Examples
    ///
    /// ```
    /// use wordtally::throttle::ProgressThrottle;
    ///
    /// let throttle = ProgressThrottle::new(5.0);
    /// assert!(throttle.admit(10)); // first call always passes
    /// assert!(!throttle.admit(20)); // too soon after the first
    /// assert!(throttle.admit(100)); // completion is never dropped
    /// ```
    #[must_use]
    pub fn new(max_per_sec: f64) -> Self {
        let min_interval = if max_per_sec.is_finite() && max_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / max_per_sec)
        } else {
            Duration::ZERO
        };

        Self {
            min_interval_nanos: min_interval.as_nanos() as u64,
            last_delivery: Arc::new(AtomicU64::new(NEVER)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Decide whether a progress report of `percent` should reach the consumer
    ///
    /// Returns `true` when the caller should deliver it.
    pub fn admit(&self, percent: u8) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }

        if percent >= 100 {
            // Only the first completion report wins
            let first = !self.finished.swap(true, Ordering::AcqRel);
            if first {
                self.last_delivery.store(Self::now_nanos(), Ordering::Release);
            }
            return first;
        }

        let now = Self::now_nanos();
        let last = self.last_delivery.load(Ordering::Acquire);

        if last != NEVER && now.saturating_sub(last) < self.min_interval_nanos {
            return false;
        }

        self.last_delivery
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether 100% has been delivered
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Put this throttle in front of `sink`
    ///
    /// The returned callback forwards only the reports [`admit`](Self::admit)
    /// lets through.
    #[must_use]
    pub fn wrap(self, sink: ProgressFn) -> ProgressFn {
        Arc::new(move |percent| {
            if self.admit(percent) {
                sink(percent);
            }
        })
    }

    /// Get current monotonic time in nanoseconds
    ///
    /// The epoch is arbitrary but consistent within a process lifetime.
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_report_is_delivered() {
        let throttle = ProgressThrottle::new(5.0);
        assert!(throttle.admit(1));
    }

    #[test]
    fn reports_inside_the_interval_are_dropped() {
        let throttle = ProgressThrottle::new(5.0); // 200ms interval

        assert!(throttle.admit(10));
        for percent in 11..50 {
            assert!(
                !throttle.admit(percent),
                "report {percent} arrived within 200ms and must be dropped"
            );
        }
    }

    #[test]
    fn report_after_the_interval_is_delivered() {
        let throttle = ProgressThrottle::new(20.0); // 50ms interval
        assert!(throttle.admit(10));

        std::thread::sleep(Duration::from_millis(80));

        assert!(throttle.admit(20));
        assert!(!throttle.admit(30), "interval restarts at the new delivery");
    }

    #[test]
    fn completion_bypasses_the_rate_ceiling() {
        let throttle = ProgressThrottle::new(5.0);

        assert!(throttle.admit(99));
        assert!(throttle.admit(100), "100% must be delivered even right after 99%");
        assert!(throttle.is_finished());
    }

    #[test]
    fn completion_is_delivered_exactly_once_and_closes_the_throttle() {
        let throttle = ProgressThrottle::new(1_000_000.0);

        assert!(throttle.admit(100));
        assert!(!throttle.admit(100), "duplicate completion must be dropped");

        // A lagging worker that computed a lower percentage before completion
        std::thread::sleep(Duration::from_millis(2));
        assert!(!throttle.admit(80), "nothing may follow the completion report");
    }

    #[test]
    fn clone_shares_state() {
        let original = ProgressThrottle::new(5.0);
        let clone = original.clone();

        assert!(clone.admit(5));
        assert!(!original.admit(6), "clone's delivery must count for the original");

        assert!(original.admit(100));
        assert!(clone.is_finished());
    }

    #[test]
    fn non_positive_rate_disables_throttling() {
        let throttle = ProgressThrottle::new(0.0);
        for percent in 0..10 {
            assert!(throttle.admit(percent));
        }
    }

    #[test]
    fn wrapped_sink_sees_only_admitted_reports() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let progress = ProgressThrottle::new(5.0)
            .wrap(Arc::new(move |p| sink_seen.lock().unwrap().push(p)));

        for percent in [5, 10, 15, 100, 100, 60] {
            progress(percent);
        }

        assert_eq!(*seen.lock().unwrap(), vec![5, 100]);
    }

    #[test]
    fn concurrent_completion_reports_deliver_once() {
        let throttle = ProgressThrottle::new(5.0);
        let delivered = Arc::new(AtomicU64::new(0));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let throttle = throttle.clone();
                let delivered = delivered.clone();
                s.spawn(move || {
                    if throttle.admit(100) {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
