use serde::{Deserialize, Serialize};

use crate::value::json_f64;

/// Descriptive statistics over the valid, unmasked rows of a column.
///
/// Every field starts out NaN and all of them are filled in together; a column with no
/// usable rows keeps the all-NaN snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    #[serde(with = "json_f64")]
    pub minimum: f64,
    #[serde(with = "json_f64")]
    pub maximum: f64,
    #[serde(with = "json_f64")]
    pub arithmetic_mean: f64,
    #[serde(with = "json_f64")]
    pub geometric_mean: f64,
    #[serde(with = "json_f64")]
    pub harmonic_mean: f64,
    #[serde(with = "json_f64")]
    pub contraharmonic_mean: f64,
    #[serde(with = "json_f64")]
    pub median: f64,
    /// Population variance
    #[serde(with = "json_f64")]
    pub variance: f64,
    #[serde(with = "json_f64")]
    pub standard_deviation: f64,
    /// Mean absolute deviation around the mean
    #[serde(with = "json_f64")]
    pub mean_deviation: f64,
    /// Mean absolute deviation around the median
    #[serde(with = "json_f64")]
    pub mean_deviation_around_median: f64,
    /// Median absolute deviation
    #[serde(with = "json_f64")]
    pub median_deviation: f64,
    #[serde(with = "json_f64")]
    pub skewness: f64,
    /// Excess kurtosis (normal distribution = 0)
    #[serde(with = "json_f64")]
    pub kurtosis: f64,
    /// Shannon entropy in bits over the distinct values
    #[serde(with = "json_f64")]
    pub entropy: f64,
}

impl Default for ColumnStatistics {
    fn default() -> Self {
        Self {
            minimum: f64::NAN,
            maximum: f64::NAN,
            arithmetic_mean: f64::NAN,
            geometric_mean: f64::NAN,
            harmonic_mean: f64::NAN,
            contraharmonic_mean: f64::NAN,
            median: f64::NAN,
            variance: f64::NAN,
            standard_deviation: f64::NAN,
            mean_deviation: f64::NAN,
            mean_deviation_around_median: f64::NAN,
            median_deviation: f64::NAN,
            skewness: f64::NAN,
            kurtosis: f64::NAN,
            entropy: f64::NAN,
        }
    }
}

/// Median of already sorted values
fn sorted_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted_median(&sorted)
}

impl ColumnStatistics {
    /// Compute every statistic over `values`, which must already exclude invalid and
    /// masked rows.
    pub fn compute(values: &[f64]) -> Self {
        let mut stats = Self::default();
        if values.is_empty() {
            return stats;
        }
        let n = values.len() as f64;

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut sum_ln = 0.0;
        let mut sum_inv = 0.0;
        let mut any_non_positive = false;
        let mut any_zero = false;
        for &x in values {
            sum += x;
            sum_sq += x * x;
            if x <= 0.0 {
                any_non_positive = true;
            } else {
                sum_ln += x.ln();
            }
            if x == 0.0 {
                any_zero = true;
            } else {
                sum_inv += 1.0 / x;
            }
        }

        let mean = sum / n;
        let median = sorted_median(&sorted);

        let mut m2 = 0.0;
        let mut m3 = 0.0;
        let mut m4 = 0.0;
        let mut abs_dev_mean = 0.0;
        let mut abs_dev_median = 0.0;
        let mut median_devs = Vec::with_capacity(values.len());
        for &x in values {
            let d = x - mean;
            m2 += d * d;
            m3 += d * d * d;
            m4 += d * d * d * d;
            abs_dev_mean += d.abs();
            let dm = (x - median).abs();
            abs_dev_median += dm;
            median_devs.push(dm);
        }
        let variance = m2 / n;
        let sd = variance.sqrt();

        let mut entropy = 0.0;
        for run in sorted.chunk_by(|a, b| a == b) {
            let p = run.len() as f64 / n;
            entropy -= p * p.log2();
        }

        stats.minimum = sorted[0];
        stats.maximum = sorted[sorted.len() - 1];
        stats.arithmetic_mean = mean;
        stats.geometric_mean = if any_non_positive {
            f64::NAN
        } else {
            (sum_ln / n).exp()
        };
        stats.harmonic_mean = if any_zero { f64::NAN } else { n / sum_inv };
        stats.contraharmonic_mean = sum_sq / sum;
        stats.median = median;
        stats.variance = variance;
        stats.standard_deviation = sd;
        stats.mean_deviation = abs_dev_mean / n;
        stats.mean_deviation_around_median = abs_dev_median / n;
        stats.median_deviation = median_of(&median_devs);
        stats.skewness = (m3 / n) / sd.powi(3);
        stats.kurtosis = (m4 / n) / sd.powi(4) - 3.0;
        stats.entropy = entropy;
        stats
    }
}

/// Ordering flags of a column, derived in one scan over its valid, unmasked values.
///
/// The direction convention is deliberately the historical one: `monotonic_increasing`
/// holds when every value is less than or equal to the one before it (`prev >= cur`), so a
/// strictly descending sequence such as `5, 4, 3, 2, 1` reports `monotonic_increasing`.
/// `monotonic_decreasing` is the mirror (`prev <= cur`). A constant column sets all three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProperties {
    pub constant: bool,
    pub monotonic_increasing: bool,
    pub monotonic_decreasing: bool,
}

impl ColumnProperties {
    /// Scan values in row order; no values yields no properties
    pub fn scan(values: impl IntoIterator<Item = f64>) -> Self {
        let mut iter = values.into_iter();
        let Some(mut prev) = iter.next() else {
            return Self::default();
        };

        let mut props = ColumnProperties {
            constant: true,
            monotonic_increasing: true,
            monotonic_decreasing: true,
        };
        for cur in iter {
            if prev != cur {
                props.constant = false;
            }
            if prev < cur {
                props.monotonic_increasing = false;
            }
            if prev > cur {
                props.monotonic_decreasing = false;
            }
            if !props.monotonic_increasing && !props.monotonic_decreasing {
                break;
            }
            prev = cur;
        }
        props
    }

    pub fn is_empty(&self) -> bool {
        !self.constant && !self.monotonic_increasing && !self.monotonic_decreasing
    }
}
