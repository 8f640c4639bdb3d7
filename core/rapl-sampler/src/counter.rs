//! Differences between successive values of a cumulative hardware counter.

/// Tracks the previous value of an overflowing counter and computes deltas.
///
/// The previous value is seeded at construction instead of being unknown
/// until the first update: perf_event counters start from zero when they are opened,
/// therefore the first delta is the energy consumed since the counter was opened.
#[derive(Debug)]
pub struct CounterDiff {
    pub max_value: u64,
    previous_value: u64,
}

/// Result of [`CounterDiff::update()`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum CounterDiffUpdate {
    /// Normal counter update, gives the difference between the current and the previous value.
    Difference(u64),
    /// Counter update with overflow correction, gives the corrected difference.
    /// It is impossible to know whether only one or more than one overflow occurred.
    CorrectedDifference(u64),
}

impl CounterDiff {
    /// Creates a new `CounterDiff` with a maximum value and an initial previous value.
    pub fn starting_at(initial: u64, max_value: u64) -> CounterDiff {
        CounterDiff {
            max_value,
            previous_value: initial,
        }
    }

    /// The last value given to [`update`](Self::update), or the initial value.
    pub fn previous(&self) -> u64 {
        self.previous_value
    }

    /// Provides a new value and computes the difference with the previous value.
    pub fn update(&mut self, new_value: u64) -> CounterDiffUpdate {
        debug_assert!(new_value <= self.max_value, "No value can be greater than max_value!");
        let prev = self.previous_value;
        let res = if new_value < prev {
            // wrapping arithmetic: correct when max_value is u64::MAX, and avoids an overflow otherwise
            let diff = (self.max_value - prev).wrapping_add(new_value).wrapping_add(1);
            CounterDiffUpdate::CorrectedDifference(diff)
        } else {
            CounterDiffUpdate::Difference(new_value - prev)
        };
        self.previous_value = new_value;
        res
    }
}

impl CounterDiffUpdate {
    /// Returns the difference that has been computed (and potentially corrected).
    pub fn ticks(self) -> u64 {
        match self {
            CounterDiffUpdate::Difference(d) | CounterDiffUpdate::CorrectedDifference(d) => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_is_relative_to_the_seed() {
        let mut counter = CounterDiff::starting_at(0, u64::MAX);
        assert_eq!(counter.update(12), CounterDiffUpdate::Difference(12));
        assert_eq!(counter.previous(), 12);
    }

    #[test]
    fn counter_diff_update() {
        let mut counter = CounterDiff::starting_at(10, 255);
        let expectations = vec![
            (15, CounterDiffUpdate::Difference(5)),
            (45, CounterDiffUpdate::Difference(30)),
            (255, CounterDiffUpdate::Difference(210)),
            (0, CounterDiffUpdate::CorrectedDifference(1)),
            (10, CounterDiffUpdate::Difference(10)),
            (3, CounterDiffUpdate::CorrectedDifference(249)),
            (2, CounterDiffUpdate::CorrectedDifference(255)),
            (2, CounterDiffUpdate::Difference(0)),
        ];
        for (idx, expectation) in expectations.iter().enumerate() {
            let diff = counter.update(expectation.0);
            assert_eq!(
                diff, expectation.1,
                "Failed at index {idx}: input={}, expected={:?}, got={:?}",
                expectation.0, expectation.1, diff
            );
        }
    }

    #[test]
    fn full_width_counter_wraps_like_unsigned_subtraction() {
        let mut counter = CounterDiff::starting_at(u64::MAX - 4, u64::MAX);
        let diff = counter.update(5);
        assert_eq!(diff, CounterDiffUpdate::CorrectedDifference(10));
        assert_eq!(diff.ticks(), 5u64.wrapping_sub(u64::MAX - 4));
    }

    #[test]
    fn increasing_values_give_non_negative_deltas() {
        let mut counter = CounterDiff::starting_at(0, u64::MAX);
        let mut total = 0;
        for value in [1u64, 7, 7, 100, 1 << 40] {
            let diff = counter.update(value);
            assert!(matches!(diff, CounterDiffUpdate::Difference(_)));
            total += diff.ticks();
        }
        assert_eq!(total, 1 << 40);
    }

    #[test]
    #[should_panic(expected = "No value can be greater than max_value!")]
    #[cfg(debug_assertions)]
    fn counter_diff_over_max_value() {
        let mut counter = CounterDiff::starting_at(0, 255);
        let _ = counter.update(256);
    }
}
