use std::time::Duration;

/// Linear backoff for reconnecting to the miner.
///
/// Counts consecutive failures. The delay after the `n`th failure is
/// `1 + ceil(n / 10)` seconds: two seconds for the first ten failures, three
/// for the next ten, and so on without an upper bound. A successful round
/// trip resets the count.
#[derive(Debug, Default)]
pub struct LinearBackoff {
    failures: u32,
}

impl LinearBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay that follows the given number of consecutive failures.
    pub fn delay_for(failures: u32) -> Duration {
        Duration::from_secs(1 + u64::from(failures).div_ceil(10))
    }

    /// Count one more failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        Self::delay_for(self.failures)
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 1)]
    #[test_case(1, 2)]
    #[test_case(9, 2)]
    #[test_case(10, 2)]
    #[test_case(11, 3)]
    #[test_case(20, 3)]
    #[test_case(21, 4)]
    #[test_case(105, 12)]
    fn delay_matches_formula(failures: u32, secs: u64) {
        assert_eq!(LinearBackoff::delay_for(failures), Duration::from_secs(secs));
    }

    #[test]
    fn delay_never_decreases() {
        let mut previous = Duration::ZERO;
        for failures in 0..500 {
            let delay = LinearBackoff::delay_for(failures);
            assert!(delay >= previous, "delay shrank at {failures}");
            previous = delay;
        }
    }

    #[test]
    fn record_failure_counts_and_grows() {
        let mut backoff = LinearBackoff::new();
        assert_eq!(backoff.failures(), 0);

        let delays: Vec<_> = (0..11).map(|_| backoff.record_failure()).collect();

        assert_eq!(backoff.failures(), 11);
        assert!(delays[..10].iter().all(|d| *d == Duration::from_secs(2)));
        assert_eq!(delays[10], Duration::from_secs(3));
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = LinearBackoff::new();
        for _ in 0..25 {
            backoff.record_failure();
        }

        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.record_failure(), Duration::from_secs(2));
    }
}
