//! End-of-run statistics on the total energy samples.

/// Percentiles included in a [`Summary`].
pub const REPORTED_PERCENTILES: [u8; 7] = [0, 5, 25, 50, 75, 95, 100];

/// Summary of a measurement run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub sample_count: usize,
    /// `sample_count * interval`: assumes that the timer is perfectly accurate.
    pub elapsed_secs: f64,
    /// Only computed when there are at least two samples.
    pub distribution: Option<Distribution>,
}

/// Distribution of the total power over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub total_energy_j: f64,
    pub mean_w: f64,
    /// Population standard deviation (divisor `n`).
    pub std_dev_w: f64,
    /// Nearest-rank percentiles, in the order of [`REPORTED_PERCENTILES`].
    pub percentiles: Vec<Percentile>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentile {
    pub rank: u8,
    pub watts: f64,
}

/// Computes the statistics of a run from its samples (total energy per interval, in Joules).
pub fn summarize(samples: &[f64], interval_secs: f64) -> Summary {
    let n = samples.len();
    let elapsed_secs = n as f64 * interval_secs;
    if n < 2 {
        // too few points for a variance
        return Summary {
            sample_count: n,
            elapsed_secs,
            distribution: None,
        };
    }

    let total_energy_j: f64 = samples.iter().sum();
    let mean = mean(samples);
    let std_dev = population_std_dev(samples, mean);

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let percentiles = REPORTED_PERCENTILES
        .iter()
        .map(|&rank| Percentile {
            rank,
            watts: nearest_rank(&sorted, rank) / interval_secs,
        })
        .collect();

    Summary {
        sample_count: n,
        elapsed_secs,
        distribution: Some(Distribution {
            total_energy_j,
            mean_w: mean / interval_secs,
            std_dev_w: std_dev / interval_secs,
            percentiles,
        }),
    }
}

/// Arithmetic mean. Returns NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation: `sqrt(Σ(x - mean)² / n)`.
///
/// The samples are the entire observed population, not a random subsample, hence the divisor `n`.
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    let sum_of_squared_deviations: f64 = values
        .iter()
        .map(|x| {
            let deviation = x - mean;
            deviation * deviation
        })
        .sum();
    (sum_of_squared_deviations / values.len() as f64).sqrt()
}

/// Percentile of `sorted` (ascending, non-empty) with the Nearest Rank method.
///
/// The result is always one of the values of `sorted`, never an interpolation.
pub fn nearest_rank(sorted: &[f64], percentile: u8) -> f64 {
    assert!(!sorted.is_empty(), "no percentile of an empty sequence");
    let n = sorted.len();
    let p = usize::from(percentile.min(100));
    // ceil(p/100 * n) in integer arithmetic, to avoid rounding errors like 0.95 * 20 > 19
    let rank = (p * n).div_ceil(100);
    let index = rank.saturating_sub(1).min(n - 1);
    sorted[index]
}
