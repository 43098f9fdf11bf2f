use std::time::Duration;

/// Fraction of the base delay added or removed as jitter
const JITTER: f32 = 0.3;

/// Bounded exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay before the next attempt. Doubles the base each call up to the
    /// maximum, then applies jitter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        with_jitter(base)
    }

    /// Back to the minimum after a successful connect
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Spread `base` by up to ±30%
fn with_jitter(base: Duration) -> Duration {
    let jitter_factor = rand::random::<f32>() * (2.0 * JITTER) - JITTER;
    let jitter = base.mul_f32(jitter_factor.abs());
    if jitter_factor >= 0.0 {
        base + jitter
    } else {
        base.saturating_sub(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(delay: Duration, base: Duration) -> bool {
        let (delay, base, jitter) = (delay.as_secs_f64(), base.as_secs_f64(), JITTER as f64);
        // allow for float rounding
        let slack = 1e-6;
        delay >= base * (1.0 - jitter) - slack && delay <= base * (1.0 + jitter) + slack
    }

    #[test]
    fn test_doubles_up_to_max() {
        let min = Duration::from_millis(250);
        let max = Duration::from_millis(2000);
        let mut backoff = Backoff::new(min, max);

        let expected = [250, 500, 1000, 2000, 2000, 2000];
        for base_ms in expected {
            let delay = backoff.next_delay();
            let base = Duration::from_millis(base_ms);
            assert!(
                within_jitter(delay, base),
                "delay {:?} outside jitter of {:?}",
                delay,
                base
            );
        }
    }

    #[test]
    fn test_reset() {
        let min = Duration::from_millis(100);
        let mut backoff = Backoff::new(min, Duration::from_secs(10));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(within_jitter(backoff.next_delay(), min));
    }

    #[test]
    fn test_max_below_min_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(10));
        for _ in 0..3 {
            assert!(within_jitter(backoff.next_delay(), Duration::from_millis(500)));
        }
    }
}
