use std::time::Duration;

use rand::Rng;

/// Exponential delay between failed polls, from `min` up to `max`.
///
/// `steps` is the number of consecutive failures it takes to reach `max`;
/// the multiplier is derived from it.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, steps: u16) -> Self {
        let multiplier = if min.as_secs_f64() > 0.0 && steps > 0 {
            (max.as_secs_f64() / min.as_secs_f64()).powf(1.0 / f64::from(steps))
        } else {
            1.0
        };
        Self {
            min,
            max,
            multiplier,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay after `failures` consecutive failures, without jitter.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::from_secs(0);
        }
        let exponent = (failures - 1).min(i32::MAX as u32) as i32;
        let secs = self.min.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Adds up to 10% random jitter so retries do not line up with the peripheral's
/// advertising interval.
pub fn jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_until_the_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(64), 6);
        let delays: Vec<_> = (1..=8).map(|n| backoff.delay(n).as_secs_f64()).collect();
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 64.0];
        for (delay, expected) in delays.iter().zip(expected.iter()) {
            assert!((delay - expected).abs() < 1e-6, "{} != {}", delay, expected);
        }
    }

    #[test]
    fn fail_counts_and_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 3);
        assert_eq!(backoff.fail(), Duration::from_secs(1));
        assert!(backoff.fail() > Duration::from_secs(1));
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.fail(), Duration::from_secs(1));
    }

    #[test]
    fn equal_bounds_give_a_constant_delay() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(2), 4);
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(100), Duration::from_secs(2));
    }

    #[test]
    fn huge_failure_counts_stay_capped() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(30), 2);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let delay = jitter(Duration::from_secs(10));
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(11));
        }
        assert_eq!(jitter(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
