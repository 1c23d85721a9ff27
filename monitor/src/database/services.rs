use super::{Database, ServiceRecord, ServiceState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

fn service_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceRecord> {
    let status_str: String = row.try_get("status")?;

    Ok(ServiceRecord {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        name: row.try_get("name")?,
        status: ServiceState::parse(&status_str),
        service_type: row.try_get("service_type")?,
        last_checked: row.try_get::<Option<DateTime<Utc>>, _>("last_checked")?,
        monitoring_enabled: row.try_get("monitoring_enabled")?,
    })
}

impl Database {
    /// Register or refresh a discovered service for one host. Monitoring
    /// enablement is preserved across rediscovery.
    pub async fn upsert_service(
        &self,
        host_id: i64,
        name: &str,
        status: ServiceState,
        service_type: &str,
    ) -> Result<ServiceRecord> {
        sqlx::query(
            r#"
            INSERT INTO services (host_id, name, status, service_type, last_checked)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(host_id, name) DO UPDATE SET
                status = excluded.status,
                service_type = excluded.service_type,
                last_checked = excluded.last_checked
            "#,
        )
        .bind(host_id)
        .bind(name)
        .bind(status.as_str())
        .bind(service_type)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        debug!("Service {} on host {} is {}", name, host_id, status.as_str());

        let row = sqlx::query("SELECT * FROM services WHERE host_id = ? AND name = ?")
            .bind(host_id)
            .bind(name)
            .fetch_one(self.pool())
            .await?;

        service_from_row(&row)
    }

    pub async fn update_service_status(
        &self,
        host_id: i64,
        name: &str,
        status: ServiceState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = ?, last_checked = ? WHERE host_id = ? AND name = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(host_id)
        .bind(name)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_services(&self, host_id: i64) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query("SELECT * FROM services WHERE host_id = ? ORDER BY name")
            .bind(host_id)
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(service_from_row).collect()
    }

    /// Services with monitoring enabled on this host only.
    pub async fn monitored_services(&self, host_id: i64) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM services WHERE host_id = ? AND monitoring_enabled = 1 ORDER BY name",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(service_from_row).collect()
    }

    pub async fn set_service_monitoring(
        &self,
        host_id: i64,
        name: &str,
        enabled: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE services SET monitoring_enabled = ? WHERE host_id = ? AND name = ?",
        )
        .bind(enabled)
        .bind(host_id)
        .bind(name)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
