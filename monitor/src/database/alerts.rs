use super::{AlertRecord, AlertStatus, Database, NewAlertRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AlertRecord> {
    let status_str: String = row.try_get("status")?;

    Ok(AlertRecord {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        alert_type: row.try_get("alert_type")?,
        status: if status_str == "resolved" {
            AlertStatus::Resolved
        } else {
            AlertStatus::Triggered
        },
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        message: row.try_get("message")?,
        recipients: row.try_get("recipients")?,
        sent_at: row.try_get("sent_at")?,
        resolved_at: row.try_get::<Option<DateTime<Utc>>, _>("resolved_at")?,
    })
}

impl Database {
    pub async fn insert_alert_record(&self, new: &NewAlertRecord) -> Result<AlertRecord> {
        let sent_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO alert_history (
                host_id, alert_type, status, value, threshold,
                message, recipients, sent_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.host_id)
        .bind(&new.alert_type)
        .bind(new.status.as_str())
        .bind(new.value)
        .bind(new.threshold)
        .bind(&new.message)
        .bind(&new.recipients)
        .bind(sent_at)
        .bind(new.resolved_at)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            "Logged {} alert for host {}: {}",
            new.status.as_str(),
            new.host_id,
            new.alert_type
        );

        let row = sqlx::query("SELECT * FROM alert_history WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        record_from_row(&row)
    }

    pub async fn resolve_alert_record(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE alert_history SET status = 'resolved', resolved_at = ? WHERE id = ? AND status = 'triggered'",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Whether the host has any triggered alert without a later resolved
    /// event on the same channel. Feeds the warning status.
    pub async fn triggered_alert_exists(&self, host_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM alert_history a
            WHERE a.host_id = ? AND a.status = 'triggered'
              AND NOT EXISTS (
                  SELECT 1 FROM alert_history r
                  WHERE r.host_id = a.host_id
                    AND r.alert_type = a.alert_type
                    AND r.status = 'resolved'
                    AND r.sent_at >= a.sent_at
              )
            "#,
        )
        .bind(host_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    pub async fn alert_history(&self, host_id: i64, limit: u32) -> Result<Vec<AlertRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_history WHERE host_id = ? ORDER BY sent_at DESC LIMIT ?",
        )
        .bind(host_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
