//! Tri-state host status with an adaptive staleness threshold.
//!
//! When the monitoring app itself was down, recently restarted probes have
//! not yet refreshed heartbeats; the threshold widens to 600 seconds so
//! healthy hosts do not flap to offline after an app restart.

use crate::cache::Cache;
use crate::constants::heartbeat as consts;
use crate::database::Database;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "offline")]
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Warning => "warning",
            HostStatus::Offline => "offline",
        }
    }
}

pub struct StatusCalculator {
    database: Arc<Database>,
    cache: Arc<Cache>,
    app_heartbeat_file: String,
}

impl StatusCalculator {
    pub fn new(database: Arc<Database>, cache: Arc<Cache>, app_heartbeat_file: String) -> Self {
        Self {
            database,
            cache,
            app_heartbeat_file,
        }
    }

    /// Staleness threshold in seconds, widened when the app was down.
    pub async fn effective_threshold(&self) -> i64 {
        let app_was_down =
            match super::read_app_heartbeat(&self.cache, &self.app_heartbeat_file).await {
                Some(ts) => (Utc::now() - ts).num_seconds() > consts::APP_DOWN_AFTER_SECONDS,
                None => true,
            };

        if app_was_down {
            debug!(
                "App heartbeat stale or missing, using adaptive grace of {}s",
                consts::ADAPTIVE_GRACE_SECONDS
            );
            consts::ADAPTIVE_GRACE_SECONDS
        } else {
            consts::BASE_GRACE_SECONDS
        }
    }

    /// Compute the status of one host.
    pub async fn status(&self, host_id: i64) -> Result<HostStatus> {
        if let Some(config) = self.database.get_monitoring_config(host_id).await? {
            if config.suspended {
                return Ok(HostStatus::Offline);
            }
        }

        let threshold = self.effective_threshold().await;

        let Some(heartbeat) = self.database.heartbeat_for(host_id).await? else {
            return Ok(HostStatus::Offline);
        };

        let age = (Utc::now() - heartbeat.last_heartbeat).num_seconds();
        // Age exactly at the threshold still counts as alive
        if age > threshold {
            return Ok(HostStatus::Offline);
        }

        let has_anomalies = self.database.unresolved_count(host_id).await? > 0;
        let has_alerts = self.database.triggered_alert_exists(host_id).await?;

        if has_anomalies || has_alerts {
            Ok(HostStatus::Warning)
        } else {
            Ok(HostStatus::Online)
        }
    }
}
