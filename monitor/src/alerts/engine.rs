//! Threshold evaluation with hysteresis.
//!
//! Each metric channel keeps its previous above/below state in the cache;
//! a `triggered` event fires only on the below→above edge and a `resolved`
//! event only on the above→below edge. One email carries all newly
//! triggered channels, a second all newly resolved ones.

use super::Notifier;
use crate::cache::{keys, Cache};
use crate::constants::cache_ttl;
use crate::database::{
    AlertStatus, Anomaly, Database, Host, NewAlertRecord, Sample, Severity,
};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Per-channel above/below snapshot, cached for 24 hours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertState {
    #[serde(default)]
    pub cpu: bool,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub disk: HashMap<String, bool>,
    #[serde(default)]
    pub disk_io: bool,
    #[serde(default)]
    pub network_io: bool,
}

#[derive(Debug, Clone)]
struct ChannelEvent {
    alert_type: String,
    value: f64,
    threshold: f64,
    message: String,
}

pub struct AlertEngine {
    database: Arc<Database>,
    cache: Arc<Cache>,
    notifier: Arc<Notifier>,
}

impl AlertEngine {
    pub fn new(database: Arc<Database>, cache: Arc<Cache>, notifier: Arc<Notifier>) -> Self {
        Self {
            database,
            cache,
            notifier,
        }
    }

    /// Evaluate every metric channel for a fresh sample, emit the edge
    /// events, and persist the new state.
    pub async fn evaluate_and_send(&self, host: &Host, sample: &Sample) -> Result<()> {
        // Reload config so API-side threshold changes apply immediately
        let Some(config) = self.database.get_monitoring_config(host.id).await? else {
            return Ok(());
        };

        if !config.enabled || config.suspended {
            debug!("Monitoring off for {}, skipping alert evaluation", host.name);
            return Ok(());
        }
        if config.alerts_suppressed {
            debug!("Alerts suppressed for {}, skipping alert evaluation", host.name);
            return Ok(());
        }

        let previous: AlertState = self
            .cache
            .get(&keys::alert_state(host.id))
            .await
            .unwrap_or_default();

        let mut current = AlertState::default();
        let mut triggered = Vec::new();
        let mut resolved = Vec::new();

        // CPU
        let cpu_above = sample.cpu_percent >= config.cpu_threshold;
        current.cpu = cpu_above;
        if cpu_above && !previous.cpu {
            triggered.push(ChannelEvent {
                alert_type: "CPU".to_string(),
                value: sample.cpu_percent,
                threshold: config.cpu_threshold,
                message: format!(
                    "CPU usage is {:.1}% (threshold: {}%)",
                    sample.cpu_percent, config.cpu_threshold
                ),
            });
        } else if !cpu_above && previous.cpu {
            resolved.push(ChannelEvent {
                alert_type: "CPU".to_string(),
                value: sample.cpu_percent,
                threshold: config.cpu_threshold,
                message: format!(
                    "CPU usage has returned to normal: {:.1}% (threshold: {}%)",
                    sample.cpu_percent, config.cpu_threshold
                ),
            });
        }

        // Memory
        let memory_above = sample.memory_percent >= config.memory_threshold;
        current.memory = memory_above;
        if memory_above && !previous.memory {
            triggered.push(ChannelEvent {
                alert_type: "Memory".to_string(),
                value: sample.memory_percent,
                threshold: config.memory_threshold,
                message: format!(
                    "Memory usage is {:.1}% (threshold: {}%)",
                    sample.memory_percent, config.memory_threshold
                ),
            });
        } else if !memory_above && previous.memory {
            resolved.push(ChannelEvent {
                alert_type: "Memory".to_string(),
                value: sample.memory_percent,
                threshold: config.memory_threshold,
                message: format!(
                    "Memory usage has returned to normal: {:.1}% (threshold: {}%)",
                    sample.memory_percent, config.memory_threshold
                ),
            });
        }

        // Disk, per mountpoint
        for (mountpoint, usage) in &sample.disk_usage {
            let above = usage.percent >= config.disk_threshold;
            current.disk.insert(mountpoint.clone(), above);
            let was_above = previous.disk.get(mountpoint).copied().unwrap_or(false);

            if above && !was_above {
                triggered.push(ChannelEvent {
                    alert_type: "Disk".to_string(),
                    value: usage.percent,
                    threshold: config.disk_threshold,
                    message: format!(
                        "Disk usage on {} is {:.1}% (threshold: {}%)",
                        mountpoint, usage.percent, config.disk_threshold
                    ),
                });
            } else if !above && was_above {
                resolved.push(ChannelEvent {
                    alert_type: "Disk".to_string(),
                    value: usage.percent,
                    threshold: config.disk_threshold,
                    message: format!(
                        "Disk usage on {} has returned to normal: {:.1}% (threshold: {}%)",
                        mountpoint, usage.percent, config.disk_threshold
                    ),
                });
            }
        }

        // Disk I/O, thresholds in MB/s
        if let Some(threshold_mb) = config.disk_io_threshold {
            let read_mb = sample.disk_io_read.unwrap_or(0.0) / BYTES_PER_MB;
            let write_mb = sample.disk_io_write.unwrap_or(0.0) / BYTES_PER_MB;
            let above = read_mb >= threshold_mb || write_mb >= threshold_mb;
            current.disk_io = above;

            if above && !previous.disk_io {
                triggered.push(ChannelEvent {
                    alert_type: "DiskIO".to_string(),
                    value: read_mb.max(write_mb),
                    threshold: threshold_mb,
                    message: format!(
                        "Disk I/O exceeded threshold: read {:.2} MB/s, write {:.2} MB/s (threshold: {} MB/s)",
                        read_mb, write_mb, threshold_mb
                    ),
                });
            } else if !above && previous.disk_io {
                resolved.push(ChannelEvent {
                    alert_type: "DiskIO".to_string(),
                    value: read_mb.max(write_mb),
                    threshold: threshold_mb,
                    message: format!(
                        "Disk I/O returned to normal: read {:.2} MB/s, write {:.2} MB/s (threshold: {} MB/s)",
                        read_mb, write_mb, threshold_mb
                    ),
                });
            }
        }

        // Network I/O, thresholds in MB/s
        if let Some(threshold_mb) = config.network_io_threshold {
            let sent_mb = sample.net_io_sent.unwrap_or(0.0) / BYTES_PER_MB;
            let recv_mb = sample.net_io_recv.unwrap_or(0.0) / BYTES_PER_MB;
            let above = sent_mb >= threshold_mb || recv_mb >= threshold_mb;
            current.network_io = above;

            if above && !previous.network_io {
                triggered.push(ChannelEvent {
                    alert_type: "NetworkIO".to_string(),
                    value: sent_mb.max(recv_mb),
                    threshold: threshold_mb,
                    message: format!(
                        "Network I/O exceeded threshold: sent {:.2} MB/s, received {:.2} MB/s (threshold: {} MB/s)",
                        sent_mb, recv_mb, threshold_mb
                    ),
                });
            } else if !above && previous.network_io {
                resolved.push(ChannelEvent {
                    alert_type: "NetworkIO".to_string(),
                    value: sent_mb.max(recv_mb),
                    threshold: threshold_mb,
                    message: format!(
                        "Network I/O returned to normal: sent {:.2} MB/s, received {:.2} MB/s (threshold: {} MB/s)",
                        sent_mb, recv_mb, threshold_mb
                    ),
                });
            }
        }

        if !triggered.is_empty() {
            info!("Sending {} alert(s) for {}", triggered.len(), host.name);
            self.send_threshold_email(host, &triggered, false).await;
            for event in &triggered {
                self.notifier
                    .record(&NewAlertRecord {
                        host_id: host.id,
                        alert_type: event.alert_type.clone(),
                        status: AlertStatus::Triggered,
                        value: event.value,
                        threshold: event.threshold,
                        message: event.message.clone(),
                        recipients: self.notifier.recipients_string(),
                        resolved_at: None,
                    })
                    .await?;
            }
        }

        if !resolved.is_empty() {
            info!("Sending {} resolved alert(s) for {}", resolved.len(), host.name);
            self.send_threshold_email(host, &resolved, true).await;
            for event in &resolved {
                self.notifier
                    .record(&NewAlertRecord {
                        host_id: host.id,
                        alert_type: event.alert_type.clone(),
                        status: AlertStatus::Resolved,
                        value: event.value,
                        threshold: event.threshold,
                        message: event.message.clone(),
                        recipients: self.notifier.recipients_string(),
                        resolved_at: Some(Utc::now()),
                    })
                    .await?;
            }
        }

        self.cache
            .put(&keys::alert_state(host.id), &current, cache_ttl::ALERT_STATE)
            .await;

        Ok(())
    }

    async fn send_threshold_email(&self, host: &Host, events: &[ChannelEvent], resolved: bool) {
        let (subject, heading, footer) = if resolved {
            (
                format!("Resolved: {} - Threshold Returned to Normal", host.name),
                "Server Alert Resolved Notification",
                "The resource usage has returned to normal levels.",
            )
        } else {
            (
                format!("Alert: {} - Threshold Exceeded", host.name),
                "Server Alert Notification",
                "Please investigate the server load.",
            )
        };

        let alert_list = events
            .iter()
            .map(|e| format!("- {}", e.message))
            .collect::<Vec<_>>()
            .join("\n");

        let body = format!(
            "{}\n\nServer: {}\nAddress: {}\nTime: {}\n\nAlerts:\n{}\n\n{}\n",
            heading,
            host.name,
            host.address,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            alert_list,
            footer
        );

        self.notifier.email(&subject, &body).await;
    }

    /// Email HIGH and CRITICAL detector findings and log them to history.
    /// Gated on the same suspension and suppression flags as thresholds.
    pub async fn notify_anomalies(&self, host: &Host, anomalies: &[Anomaly]) -> Result<()> {
        let severe: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.severity >= Severity::High)
            .collect();

        if severe.is_empty() {
            return Ok(());
        }

        let Some(config) = self.database.get_monitoring_config(host.id).await? else {
            return Ok(());
        };
        if !config.enabled || config.suspended || config.alerts_suppressed {
            return Ok(());
        }

        let alert_list = severe
            .iter()
            .map(|a| {
                format!(
                    "- {} {} = {:.2} (severity: {})",
                    a.metric_type, a.metric_name, a.metric_value, a.severity
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let subject = format!("Anomaly Alert: {}", host.name);
        let body = format!(
            "Anomaly Detection Notification\n\nServer: {}\nAddress: {}\nTime: {}\n\nAnomalies:\n{}\n",
            host.name,
            host.address,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            alert_list
        );

        self.notifier.email(&subject, &body).await;

        for anomaly in severe {
            self.notifier
                .record(&NewAlertRecord {
                    host_id: host.id,
                    alert_type: "Anomaly".to_string(),
                    status: AlertStatus::Triggered,
                    value: anomaly.metric_value,
                    threshold: 0.0,
                    message: format!(
                        "Anomaly detected: {} {} = {:.2} (severity: {})",
                        anomaly.metric_type,
                        anomaly.metric_name,
                        anomaly.metric_value,
                        anomaly.severity
                    ),
                    recipients: self.notifier.recipients_string(),
                    resolved_at: None,
                })
                .await?;
        }

        Ok(())
    }
}
