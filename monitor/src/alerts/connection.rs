//! Edge-triggered connection-state alerts.
//!
//! One `CONNECTION offline` event per outage episode, one `CONNECTION
//! online` on recovery. A suspend or resume action opens a 60-second quiet
//! window during which neither edge fires, so operator toggles never page.

use super::Notifier;
use crate::cache::{keys, Cache};
use crate::constants::cache_ttl;
use crate::database::{AlertStatus, Database, Host, NewAlertRecord};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConnectionAlerter {
    database: Arc<Database>,
    cache: Arc<Cache>,
    notifier: Arc<Notifier>,
}

impl ConnectionAlerter {
    pub fn new(database: Arc<Database>, cache: Arc<Cache>, notifier: Arc<Notifier>) -> Self {
        Self {
            database,
            cache,
            notifier,
        }
    }

    async fn in_quiet_window(&self, host_id: i64) -> bool {
        self.cache.contains(&keys::suspend_epoch(host_id)).await
            || self.cache.contains(&keys::resume_epoch(host_id)).await
    }

    async fn gates_open(&self, host: &Host) -> Result<bool> {
        let Some(config) = self.database.get_monitoring_config(host.id).await? else {
            return Ok(false);
        };
        if !config.enabled || config.suspended || config.alerts_suppressed {
            debug!("Connection alerts gated off for {}", host.name);
            return Ok(false);
        }
        if self.in_quiet_window(host.id).await {
            debug!("Quiet window active for {}, muting connection alerts", host.name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Called on a successful heartbeat probe. Emits `online` when the host
    /// was flagged offline.
    pub async fn handle_probe_success(&self, host: &Host) -> Result<()> {
        let was_offline: bool = self
            .cache
            .get(&keys::connection_state(host.id))
            .await
            .unwrap_or(false);

        if !was_offline {
            return Ok(());
        }

        self.cache.delete(&keys::connection_state(host.id)).await;

        if !self.gates_open(host).await? {
            return Ok(());
        }

        info!("Host {} is back online", host.name);
        self.send_connection_event(host, false).await
    }

    /// Called on a failed heartbeat probe. Emits `offline` on the first
    /// failure of an episode.
    pub async fn handle_probe_failure(&self, host: &Host) -> Result<()> {
        let was_offline: bool = self
            .cache
            .get(&keys::connection_state(host.id))
            .await
            .unwrap_or(false);

        if was_offline {
            return Ok(());
        }

        self.cache
            .put(
                &keys::connection_state(host.id),
                &true,
                cache_ttl::CONNECTION_STATE,
            )
            .await;

        if !self.gates_open(host).await? {
            return Ok(());
        }

        info!("Host {} went offline", host.name);
        self.send_connection_event(host, true).await
    }

    async fn send_connection_event(&self, host: &Host, offline: bool) -> Result<()> {
        let (subject, body, status, message) = if offline {
            (
                format!("Server Offline: {}", host.name),
                format!(
                    "Server Connection Alert\n\nServer: {}\nAddress: {}\nStatus: OFFLINE\nTime: {}\n\n\
                     The server is not responding to monitoring probes.\n\
                     This may indicate network connectivity issues or a host outage.\n\
                     Please investigate.\n",
                    host.name,
                    host.address,
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                ),
                AlertStatus::Triggered,
                "Server is OFFLINE".to_string(),
            )
        } else {
            (
                format!("Server Online: {}", host.name),
                format!(
                    "Server Connection Alert - RESOLVED\n\nServer: {}\nAddress: {}\nStatus: ONLINE\nTime: {}\n\n\
                     The server connection has been restored and is responding normally.\n",
                    host.name,
                    host.address,
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                ),
                AlertStatus::Resolved,
                "Server connection restored".to_string(),
            )
        };

        self.notifier.email(&subject, &body).await;

        self.notifier
            .record(&NewAlertRecord {
                host_id: host.id,
                alert_type: "CONNECTION".to_string(),
                status,
                value: 0.0,
                threshold: 0.0,
                message,
                recipients: self.notifier.recipients_string(),
                resolved_at: if offline { None } else { Some(Utc::now()) },
            })
            .await?;

        Ok(())
    }
}
