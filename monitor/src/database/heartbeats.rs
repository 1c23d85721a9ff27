use super::{Database, Heartbeat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

impl Database {
    /// Insert or refresh the heartbeat for a host. Idempotent for repeated
    /// timestamps; an absent agent version keeps the previous one.
    pub async fn upsert_heartbeat(
        &self,
        host_id: i64,
        timestamp: DateTime<Utc>,
        agent_version: Option<&str>,
    ) -> Result<Heartbeat> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (host_id, last_heartbeat, agent_version)
            VALUES (?, ?, ?)
            ON CONFLICT(host_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                agent_version = COALESCE(excluded.agent_version, heartbeats.agent_version)
            "#,
        )
        .bind(host_id)
        .bind(timestamp)
        .bind(agent_version)
        .execute(self.pool())
        .await?;

        debug!("Heartbeat updated for host {}", host_id);

        let row = sqlx::query("SELECT * FROM heartbeats WHERE host_id = ?")
            .bind(host_id)
            .fetch_one(self.pool())
            .await?;

        Ok(Heartbeat {
            host_id: row.try_get("host_id")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            agent_version: row.try_get("agent_version")?,
        })
    }

    pub async fn heartbeat_for(&self, host_id: i64) -> Result<Option<Heartbeat>> {
        let row = sqlx::query("SELECT * FROM heartbeats WHERE host_id = ?")
            .bind(host_id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(Heartbeat {
                host_id: row.try_get("host_id")?,
                last_heartbeat: row.try_get("last_heartbeat")?,
                agent_version: row.try_get("agent_version")?,
            })),
            None => Ok(None),
        }
    }
}
