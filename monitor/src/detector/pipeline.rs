//! Time-series preparation and the single-metric detectors.
//!
//! Raw samples arrive on an irregular clock; every detector here works on a
//! series resampled to a regular grid whose period is the host's collection
//! interval. Missing points are forward-filled, then back-filled, and any
//! still-empty slots take the series mean.

use chrono::{DateTime, Utc};

/// Result of running one detector over a prepared series.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub flags: Vec<bool>,
    /// Whether the newest point (or newest computable window) fired.
    pub latest: bool,
}

impl DetectionOutcome {
    fn none(len: usize) -> Self {
        Self {
            flags: vec![false; len],
            latest: false,
        }
    }

    pub fn fired(&self) -> bool {
        self.flags.iter().any(|f| *f)
    }

    /// Proportion of flagged points, used as the anomaly score.
    pub fn score(&self) -> f64 {
        if self.flags.is_empty() {
            return 0.0;
        }
        self.flags.iter().filter(|f| **f).count() as f64 / self.flags.len() as f64
    }
}

/// Resample (timestamp, value) points onto a regular grid.
pub fn prepare_series(points: &[(DateTime<Utc>, f64)], period_seconds: u64) -> Vec<f64> {
    if points.is_empty() {
        return Vec::new();
    }

    let period = period_seconds.max(1) as i64;

    let mut sorted: Vec<(i64, f64)> = points
        .iter()
        .map(|(ts, v)| (ts.timestamp(), *v))
        .collect();
    sorted.sort_by_key(|(ts, _)| *ts);

    let start = sorted[0].0;
    let end = sorted[sorted.len() - 1].0;
    let buckets = ((end - start) / period) as usize + 1;

    // Bucket means; duplicates within a slot average out.
    let mut sums = vec![0.0f64; buckets];
    let mut counts = vec![0usize; buckets];
    for (ts, value) in &sorted {
        if value.is_nan() || value.is_infinite() {
            continue;
        }
        let idx = ((ts - start) / period) as usize;
        sums[idx] += value;
        counts[idx] += 1;
    }

    let mut series: Vec<Option<f64>> = (0..buckets)
        .map(|i| {
            if counts[i] > 0 {
                Some(sums[i] / counts[i] as f64)
            } else {
                None
            }
        })
        .collect();

    // Forward fill
    let mut last = None;
    for slot in series.iter_mut() {
        match slot {
            Some(v) => last = Some(*v),
            None => *slot = last,
        }
    }

    // Back fill the leading gap
    let mut next = None;
    for slot in series.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(*v),
            None => *slot = next,
        }
    }

    // Last resort: fill with the mean of known values, or zero
    let known: Vec<f64> = series.iter().flatten().copied().collect();
    let fill = if known.is_empty() {
        0.0
    } else {
        known.iter().sum::<f64>() / known.len() as f64
    };

    series.into_iter().map(|v| v.unwrap_or(fill)).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Robust spread estimate: IQR scaled to sigma, falling back to the plain
/// standard deviation for degenerate distributions.
fn robust_sigma(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return std_dev(values);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(sorted.len() * 3) / 4];
    let iqr = q3 - q1;
    if iqr > f64::EPSILON {
        iqr / 1.349
    } else {
        std_dev(values)
    }
}

/// Flags every point at or above the detection threshold.
pub fn threshold_detect(series: &[f64], high: f64) -> DetectionOutcome {
    let flags: Vec<bool> = series.iter().map(|v| *v >= high).collect();
    let latest = flags.last().copied().unwrap_or(false);
    DetectionOutcome { flags, latest }
}

/// Flags points deviating from a rolling reference by more than `c` robust
/// sigmas of the deviation distribution.
pub fn persist_detect(series: &[f64], window: usize, c: f64) -> DetectionOutcome {
    let n = series.len();
    if n <= window || window == 0 {
        return DetectionOutcome::none(n);
    }

    let mut diffs = Vec::with_capacity(n - window);
    for i in window..n {
        let reference = mean(&series[i - window..i]);
        diffs.push(series[i] - reference);
    }

    let mut sorted = diffs.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let med = median(&sorted);
    let sigma = robust_sigma(&diffs);

    let mut flags = vec![false; n];
    if sigma > f64::EPSILON {
        for (offset, diff) in diffs.iter().enumerate() {
            if (diff - med).abs() > c * sigma {
                flags[window + offset] = true;
            }
        }
    }

    let latest = flags[n - 1];
    DetectionOutcome { flags, latest }
}

/// Flags change-points where the means of two adjacent windows part by more
/// than `threshold` sigmas. The flag lands on the window boundary; a shift
/// within the trailing window counts as firing on the latest point.
pub fn level_shift_detect(series: &[f64], window: usize, threshold: f64) -> DetectionOutcome {
    let n = series.len();
    if window == 0 || n < window * 2 {
        return DetectionOutcome::none(n);
    }

    let mut centers = Vec::new();
    let mut diffs = Vec::new();
    for i in window..=(n - window) {
        let left = mean(&series[i - window..i]);
        let right = mean(&series[i..i + window]);
        centers.push(i);
        diffs.push(right - left);
    }

    let mut sorted = diffs.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let med = median(&sorted);
    let sigma = robust_sigma(&diffs);

    let mut flags = vec![false; n];
    let mut latest = false;
    if sigma > f64::EPSILON {
        for (center, diff) in centers.iter().zip(diffs.iter()) {
            if (diff - med).abs() > threshold * sigma {
                flags[*center] = true;
                if *center + window >= n {
                    latest = true;
                }
            }
        }
    }

    DetectionOutcome { flags, latest }
}

/// Flags points where the variance ratio of two adjacent windows exceeds `c`.
pub fn volatility_shift_detect(series: &[f64], window: usize, c: f64) -> DetectionOutcome {
    let n = series.len();
    if window == 0 || n < window * 2 {
        return DetectionOutcome::none(n);
    }

    let mut flags = vec![false; n];
    let mut latest = false;

    for i in window..=(n - window) {
        let left = &series[i - window..i];
        let right = &series[i..i + window];
        let var_left = std_dev(left).powi(2);
        let var_right = std_dev(right).powi(2);

        let ratio = if var_left > f64::EPSILON {
            var_right / var_left
        } else if var_right > f64::EPSILON {
            f64::INFINITY
        } else {
            1.0
        };

        if ratio > c {
            flags[i] = true;
            if i + window >= n {
                latest = true;
            }
        }
    }

    DetectionOutcome { flags, latest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[test]
    fn test_prepare_series_regular_input_passthrough() {
        let points: Vec<_> = (0..5).map(|i| (ts(i * 30), i as f64)).collect();
        let series = prepare_series(&points, 30);
        assert_eq!(series, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_prepare_series_forward_fills_gaps() {
        let points = vec![(ts(0), 10.0), (ts(90), 40.0)];
        let series = prepare_series(&points, 30);
        // Slots at 30 s and 60 s carry the last known value forward.
        assert_eq!(series, vec![10.0, 10.0, 10.0, 40.0]);
    }

    #[test]
    fn test_prepare_series_skips_nan_values() {
        let points = vec![(ts(0), 1.0), (ts(30), f64::NAN), (ts(60), 3.0)];
        let series = prepare_series(&points, 30);
        assert_eq!(series, vec![1.0, 1.0, 3.0]);
    }

    #[test]
    fn test_threshold_detect_latest() {
        let outcome = threshold_detect(&[10.0, 20.0, 95.0], 90.0);
        assert!(outcome.latest);
        assert_eq!(outcome.flags, vec![false, false, true]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let outcome = threshold_detect(&[90.0], 90.0);
        assert!(outcome.latest);
    }

    #[test]
    fn test_persist_detect_flags_sudden_jump() {
        let mut series = vec![20.0; 25];
        series.extend([21.0, 19.0, 20.5, 90.0, 91.0]);
        let outcome = persist_detect(&series, 5, 3.0);
        assert!(outcome.latest, "sustained jump should flag the latest point");
    }

    #[test]
    fn test_persist_detect_quiet_series() {
        let series: Vec<f64> = (0..30).map(|i| 20.0 + (i % 2) as f64 * 0.5).collect();
        let outcome = persist_detect(&series, 5, 3.0);
        assert!(!outcome.latest);
    }

    #[test]
    fn test_level_shift_detect_fires_near_end() {
        let mut series = vec![20.0; 20];
        series.extend(vec![80.0; 10]);
        let outcome = level_shift_detect(&series, 10, 3.0);
        assert!(outcome.fired());
        assert!(outcome.latest);
    }

    #[test]
    fn test_volatility_shift_detect() {
        let mut series: Vec<f64> = (0..15).map(|i| 50.0 + (i % 2) as f64 * 0.1).collect();
        // Variance explodes in the second half
        series.extend((0..15).map(|i| 50.0 + ((i % 2) as f64 * 2.0 - 1.0) * 25.0));
        let outcome = volatility_shift_detect(&series, 15, 3.0);
        assert!(outcome.fired());
    }

    #[test]
    fn test_detectors_handle_short_series() {
        let series = vec![1.0, 2.0];
        assert!(!persist_detect(&series, 5, 3.0).fired());
        assert!(!level_shift_detect(&series, 10, 3.0).fired());
        assert!(!volatility_shift_detect(&series, 10, 3.0).fired());
    }
}
