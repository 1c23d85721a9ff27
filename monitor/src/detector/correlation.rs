//! Cross-metric correlation scoring.
//!
//! Builds a four-wide frame (cpu, memory, max disk percent, delta network
//! MB/s) over the recent window, z-scores each column, and combines the
//! latest absolute z-scores into one weighted signal. Designed to stay
//! cheap: plain passes over at most 120 samples.

use crate::constants::detector;
use crate::database::Sample;
use serde::Serialize;
use std::collections::HashMap;

pub const METRICS: [&str; 4] = ["cpu", "memory", "disk", "network"];

fn weight(metric: &str) -> f64 {
    match metric {
        "cpu" => 0.35,
        "memory" => 0.30,
        "disk" => 0.20,
        "network" => 0.15,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub is_anomaly: bool,
    pub score: f64,
    pub per_metric_scores: HashMap<String, f64>,
    pub correlation: HashMap<String, HashMap<String, f64>>,
}

impl CorrelationResult {
    fn quiet() -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            per_metric_scores: HashMap::new(),
            correlation: HashMap::new(),
        }
    }

    /// The metric with the strongest latest signal, for synthesizing a
    /// correlation-only anomaly.
    pub fn max_metric(&self) -> Option<(String, f64)> {
        self.per_metric_scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, v)| (k.clone(), *v))
    }
}

/// Columnar view over the sample window.
#[derive(Debug, Clone)]
pub struct MetricFrame {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub disk: Vec<f64>,
    pub network: Vec<f64>,
}

impl MetricFrame {
    /// Build a frame from chronologically ordered samples. Network is the
    /// per-step delta of summed interface counters in MB, larger of the two
    /// directions. Returns None below the minimum window.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let samples = if samples.len() > detector::CORRELATION_MAX_WINDOW {
            &samples[samples.len() - detector::CORRELATION_MAX_WINDOW..]
        } else {
            samples
        };

        if samples.len() < detector::MIN_SAMPLES {
            return None;
        }

        let mut cpu = Vec::with_capacity(samples.len());
        let mut memory = Vec::with_capacity(samples.len());
        let mut disk = Vec::with_capacity(samples.len());
        let mut network = Vec::with_capacity(samples.len());

        let mut prev_recv: Option<u64> = None;
        let mut prev_sent: Option<u64> = None;

        for sample in samples {
            cpu.push(sample.cpu_percent);
            memory.push(sample.memory_percent);
            disk.push(sample.max_disk_percent());

            let total_recv: u64 = sample.network_io.values().map(|io| io.bytes_recv).sum();
            let total_sent: u64 = sample.network_io.values().map(|io| io.bytes_sent).sum();

            let net_mb = match (prev_recv, prev_sent) {
                (Some(pr), Some(ps)) => {
                    let delta_recv = total_recv.saturating_sub(pr);
                    let delta_sent = total_sent.saturating_sub(ps);
                    delta_recv.max(delta_sent) as f64 / (1024.0 * 1024.0)
                }
                _ => 0.0,
            };
            network.push(net_mb);

            prev_recv = Some(total_recv);
            prev_sent = Some(total_sent);
        }

        Some(Self {
            cpu,
            memory,
            disk,
            network,
        })
    }

    fn column(&self, metric: &str) -> &[f64] {
        match metric {
            "cpu" => &self.cpu,
            "memory" => &self.memory,
            "disk" => &self.disk,
            _ => &self.network,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Absolute z-scores clipped to [-5, 5]; a flat column scores zero.
fn anomaly_scores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let sd = std_dev(values);
    if sd < f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| (((v - m) / sd).clamp(-5.0, 5.0)).abs())
        .collect()
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let ma = mean(a);
    let mb = mean(b);
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va < f64::EPSILON || vb < f64::EPSILON {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Run the correlation analysis over a frame.
pub fn detect(frame: &MetricFrame, threshold_factor: f64) -> CorrelationResult {
    let mut per_metric_scores = HashMap::new();
    let mut combined = 0.0;

    for metric in METRICS {
        let scores = anomaly_scores(frame.column(metric));
        let latest = scores.last().copied().unwrap_or(0.0);
        let max_score = scores.iter().copied().fold(0.0f64, f64::max);
        let normalized = if max_score > 0.0 { latest / max_score } else { 0.0 };

        combined += normalized * weight(metric);
        per_metric_scores.insert(metric.to_string(), latest);
    }

    let mut correlation = HashMap::new();
    for a in METRICS {
        let mut row = HashMap::new();
        for b in METRICS {
            row.insert(b.to_string(), pearson(frame.column(a), frame.column(b)));
        }
        correlation.insert(a.to_string(), row);
    }

    CorrelationResult {
        is_anomaly: combined > threshold_factor,
        score: combined,
        per_metric_scores,
        correlation,
    }
}

/// Load the frame for a host and run detection; quiet result on thin data.
pub fn detect_for_samples(samples: &[Sample], threshold_factor: f64) -> CorrelationResult {
    match MetricFrame::from_samples(samples) {
        Some(frame) => detect(&frame, threshold_factor),
        None => CorrelationResult::quiet(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample(cpu: f64, memory: f64) -> Sample {
        Sample {
            id: 0,
            host_id: 1,
            timestamp: chrono::Utc::now(),
            cpu_percent: cpu,
            memory_percent: memory,
            swap_percent: None,
            disk_usage: Map::new(),
            network_io: Map::new(),
            disk_io_read: None,
            disk_io_write: None,
            net_io_sent: None,
            net_io_recv: None,
            load_avg_1m: None,
            load_avg_5m: None,
            load_avg_15m: None,
            network_connections: None,
            system_uptime_seconds: None,
            top_processes: None,
        }
    }

    #[test]
    fn test_insufficient_samples_is_quiet() {
        let samples: Vec<_> = (0..5).map(|_| sample(20.0, 50.0)).collect();
        let result = detect_for_samples(&samples, 0.5);
        assert!(!result.is_anomaly);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_flat_series_scores_zero() {
        let samples: Vec<_> = (0..20).map(|_| sample(20.0, 50.0)).collect();
        let result = detect_for_samples(&samples, 0.5);
        assert!(!result.is_anomaly);
        assert!(result.score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_joint_spike_scores_high() {
        let mut samples: Vec<_> = (0..25).map(|_| sample(20.0, 50.0)).collect();
        samples.push(sample(90.0, 88.0));

        let result = detect_for_samples(&samples, 0.5);
        // cpu and memory both sit at their window max z-score
        assert!(result.score > 0.6, "score was {}", result.score);
        assert!(result.is_anomaly);
        assert!(result.per_metric_scores["cpu"] > 3.0);
    }

    #[test]
    fn test_frame_caps_at_window_limit() {
        let samples: Vec<_> = (0..200).map(|i| sample(i as f64 % 50.0, 50.0)).collect();
        let frame = MetricFrame::from_samples(&samples).unwrap();
        assert_eq!(frame.cpu.len(), crate::constants::detector::CORRELATION_MAX_WINDOW);
    }

    #[test]
    fn test_pearson_perfect_correlation() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = METRICS.iter().map(|m| weight(m)).sum();
        assert!((total - 1.0).abs() < f64::EPSILON);
    }
}
