/// Request pacing for the AirNow hourly quota.
///
/// AirNow allows roughly 500 requests per hour per key. The limiter enforces
/// two rules on every request it admits:
///
/// - a minimum spacing between consecutive requests (default 3600 / 499 s),
/// - a full pause (default 3600 s) after every `window_limit` requests,
///   after which the counter starts over.
///
/// Time comes from a [`Clock`] so the pacing can be exercised in tests
/// without actually sleeping.

use log::info;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic time source used for pacing and retry delays.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `std::thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        *lock(&self.now) += duration;
    }

    /// Total time spent in `sleep` so far.
    pub fn total_slept(&self) -> Duration {
        *lock(&self.slept)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        *lock(&self.slept) += duration;
        self.advance(duration);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Pacing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Requests admitted before the long pause.
    pub window_limit: u32,
    /// Length of the long pause.
    pub window_pause: Duration,
    /// Minimum gap between any two requests.
    pub spacing: Duration,
}

impl RateLimitConfig {
    /// Spacing that spreads `window_limit` requests evenly over `window_pause`.
    pub fn even_spacing(window_limit: u32, window_pause: Duration) -> Duration {
        window_pause.div_f64(f64::from(window_limit.max(1)))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let window_pause = Duration::from_secs(3600);
        Self {
            window_limit: 499,
            window_pause,
            spacing: Self::even_spacing(499, window_pause),
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Requests since the last long pause.
    in_window: u32,
    /// Requests since the limiter was created.
    total: u64,
    /// Earliest clock time at which the next request may go out.
    next_slot: Option<Duration>,
}

/// Shared request pacer. All methods take `&self`; the counters sit behind
/// a mutex so one limiter can gate a pool of fetch workers.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records that a request was issued now and schedules the next slot.
    pub fn record_request(&self) {
        let mut state = lock(&self.state);
        self.record_locked(&mut state);
    }

    /// How long the caller must wait before the next request may be issued.
    pub fn time_until_next_slot(&self) -> Duration {
        let state = lock(&self.state);
        self.wait_locked(&state)
    }

    /// Blocks until a slot is free, then claims it.
    ///
    /// The state lock is held across the sleep so concurrent callers are
    /// admitted one at a time.
    pub fn acquire(&self) {
        let mut state = lock(&self.state);
        let wait = self.wait_locked(&state);
        self.clock.sleep(wait);
        self.record_locked(&mut state);
    }

    /// Requests recorded since creation.
    pub fn total_requests(&self) -> u64 {
        lock(&self.state).total
    }

    fn wait_locked(&self, state: &LimiterState) -> Duration {
        match state.next_slot {
            Some(slot) => slot.saturating_sub(self.clock.now()),
            None => Duration::ZERO,
        }
    }

    fn record_locked(&self, state: &mut LimiterState) {
        let now = self.clock.now();
        state.total += 1;
        state.in_window += 1;

        if state.in_window >= self.config.window_limit {
            info!(
                "Reached {} requests. Pausing for {} seconds...",
                state.in_window,
                self.config.window_pause.as_secs()
            );
            state.in_window = 0;
            state.next_slot = Some(now + self.config.window_pause.max(self.config.spacing));
        } else {
            state.next_slot = Some(now + self.config.spacing);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimitConfig) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(config, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_default_spacing_is_hour_over_window_limit() {
        let config = RateLimitConfig::default();
        assert_eq!(config.window_limit, 499);
        assert_eq!(config.window_pause, Duration::from_secs(3600));
        let secs = config.spacing.as_secs_f64();
        assert!((secs - 3600.0 / 499.0).abs() < 1e-6, "spacing was {}", secs);
    }

    #[test]
    fn test_first_request_is_free() {
        let (_clock, limiter) = limiter(RateLimitConfig::default());
        assert_eq!(limiter.time_until_next_slot(), Duration::ZERO);
    }

    #[test]
    fn test_spacing_counts_down_with_clock() {
        let config = RateLimitConfig {
            window_limit: 10,
            window_pause: Duration::from_secs(60),
            spacing: Duration::from_secs(5),
        };
        let (clock, limiter) = limiter(config);

        limiter.record_request();
        assert_eq!(limiter.time_until_next_slot(), Duration::from_secs(5));

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.time_until_next_slot(), Duration::from_secs(2));

        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.time_until_next_slot(), Duration::ZERO);
    }

    #[test]
    fn test_long_pause_after_window_limit_then_counter_resets() {
        let config = RateLimitConfig {
            window_limit: 3,
            window_pause: Duration::from_secs(3600),
            spacing: Duration::from_secs(1),
        };
        let (clock, limiter) = limiter(config);

        limiter.acquire();
        limiter.acquire();
        limiter.acquire();
        assert_eq!(limiter.time_until_next_slot(), Duration::from_secs(3600));

        // Fourth request waits out the pause; the fifth is back to spacing.
        limiter.acquire();
        assert_eq!(limiter.time_until_next_slot(), Duration::from_secs(1));
        assert_eq!(clock.total_slept(), Duration::from_secs(2 + 3600));
        assert_eq!(limiter.total_requests(), 4);
    }

    #[test]
    fn test_no_more_than_window_limit_requests_in_any_rolling_window() {
        let (clock, limiter) = limiter(RateLimitConfig::default());
        let limit = limiter.config().window_limit as usize;
        let window = limiter.config().window_pause;

        let mut issued = Vec::new();
        for _ in 0..(limit * 3 + 17) {
            limiter.acquire();
            issued.push(clock.now());
        }

        for i in 0..issued.len() - limit {
            let span = issued[i + limit] - issued[i];
            assert!(
                span >= window,
                "requests {}..={} span {:?}, must be at least {:?}",
                i,
                i + limit,
                span,
                window
            );
        }
    }

    #[test]
    fn test_acquire_enforces_spacing_between_requests() {
        let (clock, limiter) = limiter(RateLimitConfig::default());
        let spacing = limiter.config().spacing;

        limiter.acquire();
        let first = clock.now();
        limiter.acquire();
        assert_eq!(clock.now() - first, spacing);
    }

    #[test]
    fn test_limiter_is_shareable_across_threads() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                window_limit: 1000,
                window_pause: Duration::from_secs(3600),
                spacing: Duration::from_millis(10),
            },
            clock.clone(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        limiter.acquire();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        assert_eq!(limiter.total_requests(), 100);
        // 99 gaps of 10 ms each, serialized by the limiter.
        assert_eq!(clock.total_slept(), Duration::from_millis(990));
    }
}
