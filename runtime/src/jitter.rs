//! Additive-jitter exponential backoff: `base * 2^(attempt-1) +
//! rand(0..jitter_max)`. Distinct from [`crate::retry::RetryPolicy`]'s
//! multiplicative backoff — the refund consumer's retry schedule is
//! specified as an additive jitter term, not a scaled one.

use rand::Rng;
use std::time::Duration;

/// Compute the delay before retry attempt `attempt` (1-based: the delay
/// before the *first* retry, i.e. after the first failed attempt, is
/// `attempt == 1`).
#[must_use]
pub fn jittered_delay(base: Duration, attempt: u32, jitter_max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let scaled = base.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let jitter_ms = if jitter_max.is_zero() {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_max.as_millis() as u64)
    };
    scaled.saturating_add(Duration::from_millis(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt_before_jitter() {
        let base = Duration::from_millis(200);
        let jitter_max = Duration::ZERO;
        assert_eq!(jittered_delay(base, 1, jitter_max), Duration::from_millis(200));
        assert_eq!(jittered_delay(base, 2, jitter_max), Duration::from_millis(400));
        assert_eq!(jittered_delay(base, 3, jitter_max), Duration::from_millis(800));
    }

    #[test]
    fn jitter_adds_bounded_extra_delay() {
        let base = Duration::from_millis(200);
        let jitter_max = Duration::from_millis(100);
        for _ in 0..50 {
            let delay = jittered_delay(base, 1, jitter_max);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(300));
        }
    }
}
