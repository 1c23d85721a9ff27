use super::{Database, DiskUsage, InterfaceIo, Sample};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Sample fields produced by the collector; the store assigns id and clock.
#[derive(Debug, Clone)]
pub struct NewSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: Option<f64>,
    pub disk_usage: HashMap<String, DiskUsage>,
    pub network_io: HashMap<String, InterfaceIo>,
    pub disk_io_read: Option<f64>,
    pub disk_io_write: Option<f64>,
    pub net_io_sent: Option<f64>,
    pub net_io_recv: Option<f64>,
    pub load_avg_1m: Option<f64>,
    pub load_avg_5m: Option<f64>,
    pub load_avg_15m: Option<f64>,
    pub network_connections: Option<i64>,
    pub system_uptime_seconds: Option<f64>,
    pub top_processes: Option<serde_json::Value>,
}

fn sample_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Sample> {
    let disk_json: String = row.try_get("disk_usage")?;
    let net_json: String = row.try_get("network_io")?;
    let top_json: Option<String> = row.try_get("top_processes")?;

    Ok(Sample {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        timestamp: row.try_get("timestamp")?,
        cpu_percent: row.try_get("cpu_percent")?,
        memory_percent: row.try_get("memory_percent")?,
        swap_percent: row.try_get("swap_percent")?,
        disk_usage: serde_json::from_str(&disk_json).unwrap_or_default(),
        network_io: serde_json::from_str(&net_json).unwrap_or_default(),
        disk_io_read: row.try_get("disk_io_read")?,
        disk_io_write: row.try_get("disk_io_write")?,
        net_io_sent: row.try_get("net_io_sent")?,
        net_io_recv: row.try_get("net_io_recv")?,
        load_avg_1m: row.try_get("load_avg_1m")?,
        load_avg_5m: row.try_get("load_avg_5m")?,
        load_avg_15m: row.try_get("load_avg_15m")?,
        network_connections: row.try_get("network_connections")?,
        system_uptime_seconds: row.try_get("system_uptime_seconds")?,
        top_processes: top_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

impl Database {
    /// Append a sample for a host. The insert clock guarantees per-host
    /// timestamps are non-decreasing; a transient failure is retried once.
    pub async fn insert_sample(&self, host_id: i64, new: &NewSample) -> Result<Sample> {
        self.insert_sample_at(host_id, new, Utc::now()).await
    }

    /// Append a sample with an explicit timestamp. Used by backfill and
    /// import paths; callers must keep per-host timestamps non-decreasing.
    pub async fn insert_sample_at(
        &self,
        host_id: i64,
        new: &NewSample,
        timestamp: DateTime<Utc>,
    ) -> Result<Sample> {
        let mut attempt = 0;
        let id = loop {
            attempt += 1;
            match self.try_insert_sample(host_id, new, timestamp).await {
                Ok(id) => break id,
                Err(e) if attempt == 1 => {
                    warn!("Sample insert failed for host {}, retrying once: {}", host_id, e);
                }
                Err(e) => return Err(e),
            }
        };

        debug!("Stored sample {} for host {}", id, host_id);

        let row = sqlx::query("SELECT * FROM samples WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        sample_from_row(&row)
    }

    async fn try_insert_sample(
        &self,
        host_id: i64,
        new: &NewSample,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO samples (
                host_id, timestamp, cpu_percent, memory_percent, swap_percent,
                disk_usage, network_io, disk_io_read, disk_io_write,
                net_io_sent, net_io_recv, load_avg_1m, load_avg_5m, load_avg_15m,
                network_connections, system_uptime_seconds, top_processes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(host_id)
        .bind(timestamp)
        .bind(new.cpu_percent)
        .bind(new.memory_percent)
        .bind(new.swap_percent)
        .bind(serde_json::to_string(&new.disk_usage)?)
        .bind(serde_json::to_string(&new.network_io)?)
        .bind(new.disk_io_read)
        .bind(new.disk_io_write)
        .bind(new.net_io_sent)
        .bind(new.net_io_recv)
        .bind(new.load_avg_1m)
        .bind(new.load_avg_5m)
        .bind(new.load_avg_15m)
        .bind(new.network_connections)
        .bind(new.system_uptime_seconds)
        .bind(
            new.top_processes
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_sample(&self, host_id: i64) -> Result<Option<Sample>> {
        let row = sqlx::query(
            "SELECT * FROM samples WHERE host_id = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(host_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(sample_from_row).transpose()
    }

    /// The newest `n` samples, returned oldest first.
    pub async fn recent_samples(&self, host_id: i64, n: u32) -> Result<Vec<Sample>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM samples WHERE host_id = ? ORDER BY timestamp DESC LIMIT ?
            ) ORDER BY timestamp ASC
            "#,
        )
        .bind(host_id)
        .bind(n as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(sample_from_row).collect()
    }

    pub async fn samples_since(&self, host_id: i64, since: DateTime<Utc>) -> Result<Vec<Sample>> {
        let rows = sqlx::query(
            "SELECT * FROM samples WHERE host_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(host_id)
        .bind(since)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(sample_from_row).collect()
    }
}
