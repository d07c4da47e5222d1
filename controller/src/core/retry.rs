//! Bounded retry budget shared by connection and setup retries.

/// What the caller should do after recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget remains: run the same operation again.
    Continue,
    /// Budget exhausted: escalate to a fatal error.
    Fatal,
}

/// Counts consecutive failures of one operation against a cap.
///
/// With `cap = N` the operation may run `N + 1` times in total: the first attempt
/// plus `N` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    failures: u32,
    cap: u32,
}

impl RetryCounter {
    pub fn new(cap: u32) -> Self {
        Self { failures: 0, cap }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.cap {
            RetryDecision::Fatal
        } else {
            RetryDecision::Continue
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_cap_retries_then_goes_fatal() {
        let mut counter = RetryCounter::new(3);
        let decisions: Vec<RetryDecision> = (0..4).map(|_| counter.record_failure()).collect();
        assert_eq!(
            decisions,
            vec![
                RetryDecision::Continue,
                RetryDecision::Continue,
                RetryDecision::Continue,
                RetryDecision::Fatal,
            ]
        );
        assert_eq!(counter.failures(), 4);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut counter = RetryCounter::new(1);
        counter.record_failure();
        counter.reset();
        assert_eq!(counter.record_failure(), RetryDecision::Continue);
    }
}
