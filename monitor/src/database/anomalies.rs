use super::{Anomaly, Database, NewAnomaly, Severity};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::debug;

fn anomaly_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Anomaly> {
    let severity_str: String = row.try_get("severity")?;
    let correlation_json: Option<String> = row.try_get("correlation")?;

    Ok(Anomaly {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        sample_id: row.try_get("sample_id")?,
        timestamp: row.try_get("timestamp")?,
        metric_type: row.try_get("metric_type")?,
        metric_name: row.try_get("metric_name")?,
        metric_value: row.try_get("metric_value")?,
        severity: Severity::parse(&severity_str).unwrap_or(Severity::Low),
        anomaly_score: row.try_get("anomaly_score")?,
        acknowledged: row.try_get("acknowledged")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get::<Option<DateTime<Utc>>, _>("resolved_at")?,
        explanation: row.try_get("explanation")?,
        llm_generated: row.try_get("llm_generated")?,
        correlation: correlation_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

impl Database {
    pub async fn insert_anomaly(&self, new: &NewAnomaly) -> Result<Anomaly> {
        let timestamp = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO anomalies (
                host_id, sample_id, timestamp, metric_type, metric_name,
                metric_value, severity, anomaly_score, correlation
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.host_id)
        .bind(new.sample_id)
        .bind(timestamp)
        .bind(&new.metric_type)
        .bind(&new.metric_name)
        .bind(new.metric_value)
        .bind(new.severity.as_str())
        .bind(new.anomaly_score)
        .bind(
            new.correlation
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            "Stored anomaly {} for host {}: {} {}",
            id, new.host_id, new.metric_type, new.metric_name
        );

        let row = sqlx::query("SELECT * FROM anomalies WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        anomaly_from_row(&row)
    }

    /// Resolve an anomaly. Idempotent: the first call's timestamp sticks.
    pub async fn resolve_anomaly(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Anomaly>> {
        sqlx::query(
            "UPDATE anomalies SET resolved = 1, resolved_at = ? WHERE id = ? AND resolved = 0",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        let row = sqlx::query("SELECT * FROM anomalies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(anomaly_from_row).transpose()
    }

    pub async fn bulk_resolve_anomalies(&self, ids: &[i64]) -> Result<u64> {
        let now = Utc::now();
        let mut resolved = 0u64;

        for id in ids {
            let result = sqlx::query(
                "UPDATE anomalies SET resolved = 1, resolved_at = ? WHERE id = ? AND resolved = 0",
            )
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
            resolved += result.rows_affected();
        }

        Ok(resolved)
    }

    pub async fn unresolved_count(&self, host_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM anomalies WHERE host_id = ? AND resolved = 0",
        )
        .bind(host_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    pub async fn unresolved_for_host(&self, host_id: i64) -> Result<Vec<Anomaly>> {
        let rows = sqlx::query(
            "SELECT * FROM anomalies WHERE host_id = ? AND resolved = 0 ORDER BY timestamp DESC",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(anomaly_from_row).collect()
    }

    pub async fn anomalies_since(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>> {
        let rows = sqlx::query(
            "SELECT * FROM anomalies WHERE host_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(host_id)
        .bind(since)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(anomaly_from_row).collect()
    }

    /// Whether an unresolved anomaly of the same metric exists within the
    /// dedupe window.
    pub async fn unresolved_duplicate_exists(
        &self,
        host_id: i64,
        metric_type: &str,
        metric_name: &str,
        window_minutes: i64,
    ) -> Result<bool> {
        let since = Utc::now() - Duration::minutes(window_minutes);

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM anomalies
            WHERE host_id = ? AND metric_type = ? AND metric_name = ?
              AND resolved = 0 AND timestamp >= ?
            "#,
        )
        .bind(host_id)
        .bind(metric_type)
        .bind(metric_name)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Whether any unresolved anomaly exists within the last `hours` hours.
    /// Drives the adaptive collection interval.
    pub async fn unresolved_recent_exists(&self, host_id: i64, hours: i64) -> Result<bool> {
        let since = Utc::now() - Duration::hours(hours);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM anomalies WHERE host_id = ? AND resolved = 0 AND timestamp >= ?",
        )
        .bind(host_id)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    pub async fn get_anomaly(&self, id: i64) -> Result<Option<Anomaly>> {
        let row = sqlx::query("SELECT * FROM anomalies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(anomaly_from_row).transpose()
    }
}
