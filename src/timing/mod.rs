//! Bounded polling and human-like jitter.
//!
//! Every wait in the bot is deadline-based; this module provides the one
//! retry combinator shared by the challenge resolver and the invoice-redirect
//! wait, so no call site grows its own ad hoc sleep loop.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, sleep};

/// Poll `probe` until it yields a value or `deadline` passes.
///
/// The probe runs once immediately, then after each `interval` sleep. Sleeps
/// are clamped to the time remaining, and one final probe is issued at the
/// deadline itself, so the combinator never gives up early: `None` means the
/// deadline genuinely elapsed.
pub async fn poll_until<T, F, Fut>(deadline: Instant, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Inclusive-exclusive range of sleep durations sampled per tick.
///
/// Randomized pauses between widget interactions avoid the mechanical timing
/// signature a fixed interval would leave.
#[derive(Debug, Clone, Copy)]
pub struct JitterRange {
    min: Duration,
    max: Duration,
}

impl JitterRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: if max < min { min } else { max },
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// Draw one delay from the range.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        let min = self.min.as_secs_f32();
        let max = self.max.as_secs_f32();
        Duration::from_secs_f32(rng.gen_range(min..max))
    }
}

impl Default for JitterRange {
    /// The 0.5–1.5 s pause used after engaging a challenge widget.
    fn default() -> Self {
        Self::from_millis(500, 1500)
    }
}
