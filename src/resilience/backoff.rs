//! Exponential backoff with symmetric jitter.

use rand::Rng;
use std::time::Duration;

use super::RetryConfig;

/// Computes the delay before retry number `attempt` (0-based).
///
/// `raw = min(base_delay * multiplier^attempt, max_delay)`, perturbed by up
/// to `raw * jitter_fraction` in either direction and clamped to at least
/// `min_delay_floor`. Deterministic for a seeded `rng`.
pub fn compute_delay<R: Rng + ?Sized>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let max_nanos = config.max_delay.as_nanos() as f64;

    let raw = (config.base_delay.as_nanos() as f64 * config.backoff_multiplier.powi(exponent)).min(max_nanos);
    let jitter_span = raw * config.jitter_fraction;
    let factor: f64 = rng.gen_range(-1.0..=1.0);

    let delay = (raw + jitter_span * factor)
        .max(config.min_delay_floor.as_nanos() as f64)
        .round();

    if delay >= u64::MAX as f64 {
        return config.max_delay;
    }
    Duration::from_nanos(delay as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> RetryConfig {
        RetryConfig::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(1000))
            .backoff_multiplier(2.0)
            .jitter_fraction(0.0)
            .min_delay_floor(Duration::ZERO)
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let config = config();
        let mut rng = StdRng::seed_from_u64(7);

        let delays: Vec<u128> = (0..5)
            .map(|a| compute_delay(a, &config, &mut rng).as_millis())
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn test_floor_is_applied() {
        let config = config().min_delay_floor(Duration::from_millis(500));
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(compute_delay(0, &config, &mut rng), Duration::from_millis(500));
        assert_eq!(compute_delay(3, &config, &mut rng), Duration::from_millis(800));
    }

    #[test]
    fn test_same_seed_same_delays() {
        let config = config().jitter_fraction(0.3);

        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);

        for attempt in 0..10 {
            assert_eq!(
                compute_delay(attempt, &config, &mut a),
                compute_delay(attempt, &config, &mut b)
            );
        }
    }

    #[test]
    fn test_bounds_hold_for_all_attempts() {
        let config = config()
            .jitter_fraction(0.25)
            .min_delay_floor(Duration::from_millis(90));
        let upper = config.max_delay.mul_f64(1.0 + config.jitter_fraction);

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            for attempt in 0..40 {
                let delay = compute_delay(attempt, &config, &mut rng);
                assert!(delay >= config.min_delay_floor, "{:?} below floor", delay);
                assert!(delay <= upper, "{:?} above {:?}", delay, upper);
            }
        }
    }

    #[test]
    fn test_jitter_stays_within_span() {
        let config = config().jitter_fraction(0.2);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..200 {
            let delay = compute_delay(1, &config, &mut rng).as_secs_f64() * 1000.0;
            assert!((160.0..=240.0).contains(&delay), "{} out of range", delay);
        }
    }

    #[test]
    fn test_huge_attempt_saturates_at_max() {
        let config = config();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(compute_delay(u32::MAX, &config, &mut rng), config.max_delay);
    }
}
