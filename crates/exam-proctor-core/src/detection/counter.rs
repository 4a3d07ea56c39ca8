//! Consecutive-hit debouncing

/// Counts consecutive positive observations for one violation category
///
/// Fires once when the count reaches the threshold, then starts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCounter {
    threshold: u32,
    count: u32,
}

impl ThresholdCounter {
    /// Create a counter; a zero threshold is treated as 1
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Register a positive observation; returns true when the counter fires
    pub fn hit(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    /// Register a non-matching observation
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fires_on_threshold_and_resets() {
        let mut counter = ThresholdCounter::new(3);
        assert!(!counter.hit());
        assert!(!counter.hit());
        assert!(counter.hit());
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_zero_threshold_fires_every_hit() {
        let mut counter = ThresholdCounter::new(0);
        assert_eq!(counter.threshold(), 1);
        assert!(counter.hit());
        assert!(counter.hit());
    }

    proptest! {
        #[test]
        fn prop_short_run_never_fires(threshold in 1u32..20) {
            let mut counter = ThresholdCounter::new(threshold);
            for _ in 0..threshold - 1 {
                prop_assert!(!counter.hit());
            }
            counter.reset();
            prop_assert_eq!(counter.count(), 0);
            for _ in 0..threshold - 1 {
                prop_assert!(!counter.hit());
            }
        }

        #[test]
        fn prop_fires_once_per_full_run(threshold in 1u32..20, runs in 1u32..6) {
            let mut counter = ThresholdCounter::new(threshold);
            let fired = (0..threshold * runs).filter(|_| counter.hit()).count();
            prop_assert_eq!(fired as u32, runs);
            prop_assert_eq!(counter.count(), 0);
        }
    }
}
