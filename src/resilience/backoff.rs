//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Share of the computed delay used as the jitter range (±5%).
const JITTER_FRACTION: f64 = 0.05;

/// Calculate the delay to wait after the given (1-based) failed attempt.
///
/// `initial * multiplier^(attempt-1)`, capped at `max`. With `jitter` the
/// capped value is shifted by a uniform ±5% of itself.
pub fn calculate_backoff(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let raw = initial.as_secs_f64() * multiplier.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(max.as_secs_f64())
    } else {
        max.as_secs_f64()
    };

    let delay = if jitter && capped > 0.0 {
        let spread = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        capped + capped * spread
    } else {
        capped
    };

    Duration::from_secs_f64(delay.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(1, ms(100), ms(2000), 2.0, false), ms(100));
        assert_eq!(calculate_backoff(2, ms(100), ms(2000), 2.0, false), ms(200));
        assert_eq!(calculate_backoff(3, ms(100), ms(2000), 2.0, false), ms(400));
        assert_eq!(calculate_backoff(10, ms(100), ms(1000), 2.0, false), ms(1000));
    }

    #[test]
    fn test_huge_attempt_is_capped() {
        assert_eq!(calculate_backoff(u32::MAX, ms(100), ms(1500), 3.0, false), ms(1500));
    }

    #[test]
    fn test_jitter_stays_within_five_percent() {
        for _ in 0..200 {
            let d = calculate_backoff(2, ms(100), ms(2000), 2.0, true);
            assert!(d >= ms(189) && d <= ms(211), "{d:?}");
        }
    }

    #[test]
    fn test_zero_attempt() {
        assert_eq!(calculate_backoff(0, ms(100), ms(2000), 2.0, true), Duration::ZERO);
    }
}
