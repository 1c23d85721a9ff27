pub mod probe;

use crate::cache::{keys, Cache};
use crate::constants::{cache_ttl, probe as probe_consts, scheduler};
use crate::database::samples::NewSample;
use crate::database::{Database, Host, Sample};
use crate::errors::{MonitorError, ProbeError, StoreError};
use crate::ssh::SshExecutor;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collects one sample from one host over SSH.
pub struct Collector {
    database: Arc<Database>,
    cache: Arc<Cache>,
    ssh: Arc<SshExecutor>,
}

impl Collector {
    pub fn new(database: Arc<Database>, cache: Arc<Cache>, ssh: Arc<SshExecutor>) -> Self {
        Self {
            database,
            cache,
            ssh,
        }
    }

    /// Run one collection cycle for a host.
    ///
    /// Skips when monitoring is disabled or suspended, and when the last
    /// sample is younger than the effective collection interval. On success
    /// the sample is persisted and cached as the host's latest.
    pub async fn collect_once(&self, host: &Host) -> Result<Sample, MonitorError> {
        let config = self
            .database
            .get_monitoring_config(host.id)
            .await
            .map_err(MonitorError::from)?
            .ok_or_else(|| {
                MonitorError::Probe(ProbeError::Skipped {
                    host: host.name.clone(),
                    reason: "no monitoring config".to_string(),
                })
            })?;

        if !config.enabled {
            return Err(ProbeError::Skipped {
                host: host.name.clone(),
                reason: "monitoring disabled".to_string(),
            }
            .into());
        }
        if config.suspended {
            return Err(ProbeError::Skipped {
                host: host.name.clone(),
                reason: "monitoring suspended".to_string(),
            }
            .into());
        }

        let interval = self.effective_interval(host, &config).await;

        if let Ok(Some(last)) = self.database.latest_sample(host.id).await {
            let age = (Utc::now() - last.timestamp).num_seconds();
            if age >= 0 && (age as u64) < interval {
                debug!(
                    "Skipping {} - collected {}s ago (interval: {}s)",
                    host.name, age, interval
                );
                return Err(ProbeError::Skipped {
                    host: host.name.clone(),
                    reason: format!("collected {}s ago (interval: {}s)", age, interval),
                }
                .into());
            }
        }

        info!("Collecting metrics from {}...", host.name);

        let report = self.run_probe(host).await?;

        let validated = probe::validate(report).map_err(|reason| ProbeError::ParseFailed {
            host: host.name.clone(),
            reason,
        })?;

        let new_sample = NewSample {
            cpu_percent: validated.cpu_percent,
            memory_percent: validated.memory_percent,
            swap_percent: validated.swap_percent,
            disk_usage: validated.disk_usage,
            network_io: validated.network_io,
            disk_io_read: validated.disk_io_read,
            disk_io_write: validated.disk_io_write,
            net_io_sent: validated.net_io_sent,
            net_io_recv: validated.net_io_recv,
            load_avg_1m: validated.load_avg_1m,
            load_avg_5m: validated.load_avg_5m,
            load_avg_15m: validated.load_avg_15m,
            network_connections: validated.network_connections,
            system_uptime_seconds: validated.system_uptime_seconds,
            top_processes: validated.top_processes,
        };

        let sample = self
            .database
            .insert_sample(host.id, &new_sample)
            .await
            .map_err(|e| {
                MonitorError::Store(StoreError::QueryFailed {
                    query: "insert_sample".to_string(),
                    reason: e.to_string(),
                })
            })?;

        self.cache
            .put(
                &keys::latest_sample(host.id),
                &sample,
                cache_ttl::LATEST_SAMPLE,
            )
            .await;

        info!(
            "Collected metrics from {} (cpu {:.1}%, mem {:.1}%)",
            host.name, sample.cpu_percent, sample.memory_percent
        );

        Ok(sample)
    }

    /// The interval to honor for this cycle. With adaptive collection on and
    /// a fresh unresolved anomaly, the shorter detection interval applies.
    async fn effective_interval(
        &self,
        host: &Host,
        config: &crate::database::MonitoringConfig,
    ) -> u64 {
        if !config.adaptive_collection_enabled {
            return config.collection_interval_seconds;
        }

        match self.database.unresolved_recent_exists(host.id, 1).await {
            Ok(true) => {
                debug!(
                    "Host {} has recent anomalies, using adaptive interval {}s",
                    host.name, config.anomaly_detection_interval_seconds
                );
                config.anomaly_detection_interval_seconds
            }
            Ok(false) => config.collection_interval_seconds,
            Err(e) => {
                warn!("Adaptive interval check failed for {}: {}", host.name, e);
                config.collection_interval_seconds
            }
        }
    }

    async fn run_probe(&self, host: &Host) -> Result<probe::ProbeReport, MonitorError> {
        self.ssh
            .put_file(
                host,
                probe_consts::REMOTE_PATH,
                probe::PROBE_SCRIPT.as_bytes(),
                probe_consts::REMOTE_MODE,
                Duration::from_secs(30),
            )
            .await
            .map_err(MonitorError::from)?;

        let output = self
            .ssh
            .execute(
                host,
                &format!("python3 {}", probe_consts::REMOTE_PATH),
                Duration::from_secs(scheduler::COLLECT_TIMEOUT_SECONDS),
            )
            .await
            .map_err(MonitorError::from)?;

        if !output.success() {
            return Err(ProbeError::RemoteExecFailed {
                host: host.name.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.chars().take(500).collect(),
            }
            .into());
        }

        if output.stdout.trim().is_empty() {
            return Err(ProbeError::RemoteExecFailed {
                host: host.name.clone(),
                exit_code: output.exit_code,
                stderr: "probe produced no output".to_string(),
            }
            .into());
        }

        serde_json::from_str(output.stdout.trim()).map_err(|e| {
            ProbeError::ParseFailed {
                host: host.name.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
