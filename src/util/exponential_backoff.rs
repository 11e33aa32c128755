use std::cmp::min;
use std::time::Duration;

/// Spacing for repeated attempts (e.g. websocket reconnects): the delay starts at an initial
///  value and grows by a configured factor per attempt, up to a maximum. A successful attempt
///  resets it.
pub struct ExponentialBackoff {
    next_delay: Duration,

    config_initial_delay: Duration,
    config_max_delay: Duration,
    config_factor_eighths: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let result = ExponentialBackoff {
            next_delay: initial_delay,
            config_initial_delay: initial_delay,
            config_max_delay: max_delay,
            config_factor_eighths: 8*2, //TODO make this configurable?
        };

        assert!(result.config_factor_eighths >= 8);

        result
    }

    pub fn reset(&mut self) {
        self.next_delay = self.config_initial_delay;
    }

    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let result = self.next_delay;

        self.next_delay = (self.next_delay * self.config_factor_eighths) / 8;
        self.next_delay = min(self.next_delay, self.config_max_delay);
        result
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::initial(100, 100, 5000, 16, 100, 200)]
    #[case::later(800, 100, 5000, 16, 800, 1600)]
    #[case::almost_max(4000, 100, 5000, 16, 4000, 5000)]
    #[case::max(5000, 100, 5000, 16, 5000, 5000)]
    #[case::factor_1_5(100, 100, 5000, 12, 100, 150)]
    #[case::factor_1_5_max(4000, 100, 5000, 12, 4000, 5000)]
    #[case::factor_1(300, 100, 5000, 8, 300, 300)]
    fn test_next_delay(
        #[case] next_delay_millis: u64,
        #[case] initial_millis: u64,
        #[case] max_millis: u64,
        #[case] config_factor: u32,
        #[case] expected_result_millis: u64,
        #[case] expected_next_millis: u64,
    ) {
        let mut eb = ExponentialBackoff {
            next_delay: Duration::from_millis(next_delay_millis),
            config_initial_delay: Duration::from_millis(initial_millis),
            config_max_delay: Duration::from_millis(max_millis),
            config_factor_eighths: config_factor,
        };

        assert_eq!(eb.next_delay(), Duration::from_millis(expected_result_millis));
        assert_eq!(eb.next_delay, Duration::from_millis(expected_next_millis));
    }

    #[test]
    fn test_reset() {
        let mut eb = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1));
        for _ in 0..5 {
            let _ = eb.next_delay();
        }
        assert_eq!(eb.next_delay, Duration::from_millis(320));

        eb.reset();
        assert_eq!(eb.next_delay(), Duration::from_millis(10));
    }
}
