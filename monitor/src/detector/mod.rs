pub mod correlation;
pub mod pipeline;

use crate::constants::detector as consts;
use crate::database::{
    Anomaly, Database, Host, MonitoringConfig, NewAnomaly, Sample, Severity,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Severity from how far a value sits above its operator threshold.
pub fn severity_from_excess(value: f64, threshold: f64) -> Severity {
    if threshold <= 0.0 {
        return Severity::Low;
    }
    let excess = (value - threshold) / threshold;
    if excess > 0.5 {
        Severity::Critical
    } else if excess > 0.3 {
        Severity::High
    } else if excess > 0.1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A finding before persistence and dedupe.
#[derive(Debug, Clone)]
struct Candidate {
    metric_type: &'static str,
    metric_name: String,
    metric_value: f64,
    severity: Severity,
    anomaly_score: f64,
}

/// Runs the detection pipeline for one host against its recent samples.
pub struct AnomalyDetector {
    database: Arc<Database>,
}

impl AnomalyDetector {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Detect anomalies for the newest sample of a host. Only the first
    /// Normal → Anomalous transition is written; resolution is the alert
    /// engine's or the operator's move.
    pub async fn detect(
        &self,
        host: &Host,
        config: &MonitoringConfig,
        sample: &Sample,
    ) -> Result<Vec<Anomaly>> {
        let window = (config.detection_window as usize).max(consts::MIN_SAMPLES);
        let recent = self
            .database
            .recent_samples(host.id, window.max(consts::CORRELATION_MAX_WINDOW) as u32)
            .await?;

        if recent.len() < consts::MIN_SAMPLES {
            debug!(
                "Host {} has only {} samples, detection needs {}",
                host.name,
                recent.len(),
                consts::MIN_SAMPLES
            );
            return Ok(Vec::new());
        }

        let detection_slice = if recent.len() > window {
            &recent[recent.len() - window..]
        } else {
            &recent[..]
        };

        let mut candidates = Vec::new();

        // CPU and memory run through the full pipeline
        if let Some(c) = self.run_pipeline(
            detection_slice,
            config,
            "cpu",
            "cpu_percent",
            sample.cpu_percent,
            config.cpu_threshold,
            |s| s.cpu_percent,
        ) {
            candidates.push(c);
        }

        if let Some(c) = self.run_pipeline(
            detection_slice,
            config,
            "memory",
            "memory_percent",
            sample.memory_percent,
            config.memory_threshold,
            |s| s.memory_percent,
        ) {
            candidates.push(c);
        }

        // Disk is a per-mountpoint threshold check on the newest sample
        for (mount, usage) in &sample.disk_usage {
            if usage.percent > config.disk_threshold {
                candidates.push(Candidate {
                    metric_type: "disk",
                    metric_name: format!("disk_percent_{}", mount),
                    metric_value: usage.percent,
                    severity: severity_from_excess(usage.percent, config.disk_threshold),
                    anomaly_score: 1.0,
                });
            }
        }

        // Per-interface throughput sanity flag
        for (interface, io) in &sample.network_io {
            let total = io.bytes_sent + io.bytes_recv;
            if total > consts::NETWORK_THROUGHPUT_FLAG_BYTES {
                candidates.push(Candidate {
                    metric_type: "network",
                    metric_name: format!("network_throughput_{}", interface),
                    metric_value: total as f64 / consts::NETWORK_THROUGHPUT_FLAG_BYTES as f64,
                    severity: Severity::Medium,
                    anomaly_score: 0.7,
                });
            }
        }

        // Correlation may raise severity and can surface an anomaly on its own
        let corr = correlation::detect_for_samples(&recent, config.correlation_threshold_factor);
        let corr_context = if corr.is_anomaly {
            info!(
                "Correlated anomaly on {} (score {:.3}), raising severities",
                host.name, corr.score
            );
            for candidate in candidates.iter_mut() {
                if candidate.severity < Severity::High {
                    candidate.severity = Severity::High;
                }
            }

            if candidates.is_empty() {
                if let Some((metric, _)) = corr.max_metric() {
                    let (metric_type, value) = match metric.as_str() {
                        "cpu" => ("cpu", sample.cpu_percent),
                        "memory" => ("memory", sample.memory_percent),
                        "disk" => ("disk", sample.max_disk_percent()),
                        _ => ("network", 0.0),
                    };
                    candidates.push(Candidate {
                        metric_type,
                        metric_name: format!("{}_correlated", metric),
                        metric_value: value,
                        severity: Severity::High,
                        anomaly_score: corr.score.clamp(0.0, 1.0),
                    });
                }
            }

            Some(serde_json::to_value(&corr)?)
        } else {
            None
        };

        // Dedupe against fresh unresolved anomalies, then persist
        let mut inserted = Vec::new();
        for candidate in candidates {
            let duplicate = self
                .database
                .unresolved_duplicate_exists(
                    host.id,
                    candidate.metric_type,
                    &candidate.metric_name,
                    consts::DEDUPE_WINDOW_MINUTES,
                )
                .await?;

            if duplicate {
                debug!(
                    "Skipping duplicate anomaly for {}: {} {}",
                    host.name, candidate.metric_type, candidate.metric_name
                );
                continue;
            }

            let anomaly = self
                .database
                .insert_anomaly(&NewAnomaly {
                    host_id: host.id,
                    sample_id: Some(sample.id),
                    metric_type: candidate.metric_type.to_string(),
                    metric_name: candidate.metric_name.clone(),
                    metric_value: candidate.metric_value,
                    severity: candidate.severity,
                    anomaly_score: candidate.anomaly_score,
                    correlation: corr_context.clone(),
                })
                .await?;

            warn!(
                "Anomaly detected: {} - {} {} = {:.2} (severity: {})",
                host.name,
                anomaly.metric_type,
                anomaly.metric_name,
                anomaly.metric_value,
                anomaly.severity
            );

            inserted.push(anomaly);
        }

        Ok(inserted)
    }

    /// Run the four single-metric detectors over one metric's series.
    #[allow(clippy::too_many_arguments)]
    fn run_pipeline(
        &self,
        samples: &[Sample],
        config: &MonitoringConfig,
        metric_type: &'static str,
        metric_name: &str,
        latest_value: f64,
        operator_threshold: f64,
        extract: impl Fn(&Sample) -> f64,
    ) -> Option<Candidate> {
        let points: Vec<(DateTime<Utc>, f64)> = samples
            .iter()
            .map(|s| (s.timestamp, extract(s)))
            .collect();

        let series = pipeline::prepare_series(&points, config.collection_interval_seconds);
        if series.len() < consts::MIN_SAMPLES {
            return None;
        }

        let window = series.len();
        let persist_window = (window / 6).max(5);
        let shift_window = (window / 3).max(10);
        let detection_threshold = operator_threshold * config.threshold_factor;

        let outcomes = [
            pipeline::threshold_detect(&series, detection_threshold),
            pipeline::persist_detect(&series, persist_window, consts::ROBUST_C),
            pipeline::level_shift_detect(&series, shift_window, consts::LEVEL_SHIFT_THRESHOLD),
            pipeline::volatility_shift_detect(&series, shift_window, consts::ROBUST_C),
        ];

        if !outcomes.iter().any(|o| o.latest) {
            return None;
        }

        let max_score = outcomes
            .iter()
            .map(|o| o.score())
            .fold(0.0f64, f64::max);

        Some(Candidate {
            metric_type,
            metric_name: metric_name.to_string(),
            metric_value: latest_value,
            severity: severity_from_excess(latest_value, operator_threshold),
            anomaly_score: if max_score > 0.0 { max_score } else { 1.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity_from_excess(121.0, 80.0), Severity::Critical);
        assert_eq!(severity_from_excess(110.0, 80.0), Severity::High);
        assert_eq!(severity_from_excess(90.0, 80.0), Severity::Medium);
        assert_eq!(severity_from_excess(82.0, 80.0), Severity::Low);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_zero_threshold_is_low() {
        assert_eq!(severity_from_excess(50.0, 0.0), Severity::Low);
    }
}
