//! Deterministic jitter shared by the governor, the queues and the retry
//! policy.
//!
//! No RNG dependency: a Knuth multiplicative hash over a monotonic counter
//! spreads concurrent senders well enough to de-correlate them, and keeps
//! every delay reproducible under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide jitter sequence.
static SEQ: AtomicU64 = AtomicU64::new(0);

/// Cheap deterministic "random" fraction in `[0, 1)`.
fn fraction(seed: u64) -> f64 {
    let hash = (seed as u32).wrapping_mul(2654435761); // Knuth multiplicative hash
    f64::from(hash) / f64::from(u32::MAX)
}

fn next_fraction() -> f64 {
    fraction(SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Scale `base` by a factor drawn uniformly from `[1 − spread, 1 + spread]`.
pub fn around(base: Duration, spread: f64) -> Duration {
    let factor = 1.0 - spread + 2.0 * spread * next_fraction();
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

/// A duration drawn uniformly from `[min, max]`.
pub fn between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = max - min;
    min + Duration::from_secs_f64(span.as_secs_f64() * next_fraction())
}
