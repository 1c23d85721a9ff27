use super::{Database, Host, MonitoringConfig, NewHost};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info, warn};

fn host_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Host> {
    Ok(Host {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        ssh_port: row.try_get::<i64, _>("ssh_port")? as u16,
        ssh_user: row.try_get("ssh_user")?,
        key_deployed: row.try_get("key_deployed")?,
        key_deployed_at: row.try_get::<Option<DateTime<Utc>>, _>("key_deployed_at")?,
    })
}

fn config_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MonitoringConfig> {
    let disks_json: String = row.try_get("monitored_disks")?;
    let mut monitored_disks: Vec<String> =
        serde_json::from_str(&disks_json).unwrap_or_else(|_| vec!["/".to_string()]);
    if !monitored_disks.iter().any(|d| d == "/") {
        monitored_disks.insert(0, "/".to_string());
    }

    Ok(MonitoringConfig {
        host_id: row.try_get("host_id")?,
        enabled: row.try_get("enabled")?,
        suspended: row.try_get("suspended")?,
        alerts_suppressed: row.try_get("alerts_suppressed")?,
        collection_interval_seconds: row.try_get::<i64, _>("collection_interval_seconds")? as u64,
        anomaly_detection_interval_seconds: row
            .try_get::<i64, _>("anomaly_detection_interval_seconds")?
            as u64,
        adaptive_collection_enabled: row.try_get("adaptive_collection_enabled")?,
        cpu_threshold: row.try_get("cpu_threshold")?,
        memory_threshold: row.try_get("memory_threshold")?,
        disk_threshold: row.try_get("disk_threshold")?,
        disk_io_threshold: row.try_get("disk_io_threshold")?,
        network_io_threshold: row.try_get("network_io_threshold")?,
        detection_window: row.try_get::<i64, _>("detection_window")? as u32,
        threshold_factor: row.try_get("threshold_factor")?,
        correlation_threshold_factor: row.try_get("correlation_threshold_factor")?,
        retention_days: row.try_get::<i64, _>("retention_days")? as u32,
        monitored_disks,
        use_llm_explanation: row.try_get("use_llm_explanation")?,
    })
}

/// Partial threshold update; absent fields keep their current value.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ThresholdUpdate {
    pub cpu_threshold: Option<f64>,
    pub memory_threshold: Option<f64>,
    pub disk_threshold: Option<f64>,
    pub disk_io_threshold: Option<f64>,
    pub network_io_threshold: Option<f64>,
    pub collection_interval_seconds: Option<u64>,
    pub anomaly_detection_interval_seconds: Option<u64>,
    pub adaptive_collection_enabled: Option<bool>,
}

impl Database {
    /// Create a host together with its default monitoring config.
    pub async fn create_host(&self, new: &NewHost) -> Result<Host> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "INSERT INTO hosts (name, address, ssh_port, ssh_user, key_deployed) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(&new.name)
        .bind(&new.address)
        .bind(new.ssh_port as i64)
        .bind(&new.ssh_user)
        .execute(&mut *tx)
        .await?;

        let host_id = result.last_insert_rowid();
        let defaults = MonitoringConfig::defaults_for(host_id);

        sqlx::query(
            r#"
            INSERT INTO monitoring_configs (
                host_id, enabled, suspended, alerts_suppressed,
                collection_interval_seconds, anomaly_detection_interval_seconds,
                adaptive_collection_enabled, cpu_threshold, memory_threshold,
                disk_threshold, detection_window, threshold_factor,
                correlation_threshold_factor, retention_days, monitored_disks
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(host_id)
        .bind(defaults.enabled)
        .bind(defaults.suspended)
        .bind(defaults.alerts_suppressed)
        .bind(defaults.collection_interval_seconds as i64)
        .bind(defaults.anomaly_detection_interval_seconds as i64)
        .bind(defaults.adaptive_collection_enabled)
        .bind(defaults.cpu_threshold)
        .bind(defaults.memory_threshold)
        .bind(defaults.disk_threshold)
        .bind(defaults.detection_window as i64)
        .bind(defaults.threshold_factor)
        .bind(defaults.correlation_threshold_factor)
        .bind(defaults.retention_days as i64)
        .bind(serde_json::to_string(&defaults.monitored_disks)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Created host {} ({})", new.name, new.address);

        self.get_host(host_id)
            .await?
            .ok_or_else(|| anyhow!("Host {} vanished after insert", host_id))
    }

    pub async fn get_host(&self, id: i64) -> Result<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(host_from_row).transpose()
    }

    pub async fn get_host_by_name(&self, name: &str) -> Result<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(host_from_row).transpose()
    }

    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        let rows = sqlx::query("SELECT * FROM hosts ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(host_from_row).collect()
    }

    /// Delete a host and every record it owns.
    pub async fn delete_host(&self, id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for table in [
            "monitoring_configs",
            "samples",
            "anomalies",
            "alert_history",
            "heartbeats",
            "services",
        ] {
            let sql = format!("DELETE FROM {} WHERE host_id = ?", table);
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        }

        sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        warn!("Deleted host {} and all owned records", id);
        Ok(())
    }

    pub async fn mark_key_deployed(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE hosts SET key_deployed = 1, key_deployed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_monitoring_config(&self, host_id: i64) -> Result<Option<MonitoringConfig>> {
        let row = sqlx::query("SELECT * FROM monitoring_configs WHERE host_id = ?")
            .bind(host_id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(config_from_row).transpose()
    }

    /// Hosts whose monitoring is enabled, paired with their configs.
    pub async fn enabled_hosts(&self) -> Result<Vec<(Host, MonitoringConfig)>> {
        let hosts = self.list_hosts().await?;
        let mut result = Vec::new();

        for host in hosts {
            if let Some(config) = self.get_monitoring_config(host.id).await? {
                if config.enabled {
                    result.push((host, config));
                }
            }
        }

        Ok(result)
    }

    pub async fn update_thresholds(
        &self,
        host_id: i64,
        update: &ThresholdUpdate,
    ) -> Result<MonitoringConfig> {
        let current = self
            .get_monitoring_config(host_id)
            .await?
            .ok_or_else(|| anyhow!("No monitoring config for host {}", host_id))?;

        let cpu = update.cpu_threshold.unwrap_or(current.cpu_threshold);
        let memory = update.memory_threshold.unwrap_or(current.memory_threshold);
        let disk = update.disk_threshold.unwrap_or(current.disk_threshold);
        let disk_io = update.disk_io_threshold.or(current.disk_io_threshold);
        let network_io = update.network_io_threshold.or(current.network_io_threshold);
        let interval = update
            .collection_interval_seconds
            .unwrap_or(current.collection_interval_seconds);
        let detect_interval = update
            .anomaly_detection_interval_seconds
            .unwrap_or(current.anomaly_detection_interval_seconds);
        let adaptive = update
            .adaptive_collection_enabled
            .unwrap_or(current.adaptive_collection_enabled);

        for (name, value) in [("cpu_threshold", cpu), ("memory_threshold", memory), ("disk_threshold", disk)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 100], got {}", name, value));
            }
        }
        if interval < 5 {
            return Err(anyhow!(
                "collection_interval_seconds must be at least 5, got {}",
                interval
            ));
        }

        sqlx::query(
            r#"
            UPDATE monitoring_configs SET
                cpu_threshold = ?, memory_threshold = ?, disk_threshold = ?,
                disk_io_threshold = ?, network_io_threshold = ?,
                collection_interval_seconds = ?, anomaly_detection_interval_seconds = ?,
                adaptive_collection_enabled = ?
            WHERE host_id = ?
            "#,
        )
        .bind(cpu)
        .bind(memory)
        .bind(disk)
        .bind(disk_io)
        .bind(network_io)
        .bind(interval as i64)
        .bind(detect_interval as i64)
        .bind(adaptive)
        .bind(host_id)
        .execute(self.pool())
        .await?;

        debug!("Updated thresholds for host {}", host_id);

        self.get_monitoring_config(host_id)
            .await?
            .ok_or_else(|| anyhow!("No monitoring config for host {}", host_id))
    }

    /// Replace the monitored disk set. "/" is always kept.
    pub async fn update_monitored_disks(&self, host_id: i64, disks: Vec<String>) -> Result<()> {
        let mut disks: Vec<String> = disks
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if !disks.iter().any(|d| d == "/") {
            disks.insert(0, "/".to_string());
        }
        disks.dedup();

        sqlx::query("UPDATE monitoring_configs SET monitored_disks = ? WHERE host_id = ?")
            .bind(serde_json::to_string(&disks)?)
            .bind(host_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    pub async fn set_suspended(&self, host_id: i64, suspended: bool) -> Result<()> {
        sqlx::query("UPDATE monitoring_configs SET suspended = ? WHERE host_id = ?")
            .bind(suspended)
            .bind(host_id)
            .execute(self.pool())
            .await?;
        info!(
            "Monitoring {} for host {}",
            if suspended { "suspended" } else { "resumed" },
            host_id
        );
        Ok(())
    }

    pub async fn set_alerts_suppressed(&self, host_id: i64, suppressed: bool) -> Result<()> {
        sqlx::query("UPDATE monitoring_configs SET alerts_suppressed = ? WHERE host_id = ?")
            .bind(suppressed)
            .bind(host_id)
            .execute(self.pool())
            .await?;
        info!(
            "Alerts {} for host {}",
            if suppressed { "suppressed" } else { "resumed" },
            host_id
        );
        Ok(())
    }

    pub async fn set_enabled(&self, host_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE monitoring_configs SET enabled = ? WHERE host_id = ?")
            .bind(enabled)
            .bind(host_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
