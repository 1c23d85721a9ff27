pub mod status;

pub use status::{HostStatus, StatusCalculator};

use crate::alerts::ConnectionAlerter;
use crate::cache::{keys, Cache};
use crate::constants::{cache_ttl, scheduler};
use crate::database::{Database, Heartbeat, Host, ServiceState};
use crate::ssh::SshExecutor;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parse a persisted heartbeat timestamp (RFC 3339).
pub(crate) fn parse_heartbeat_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read the monitoring app's own heartbeat: cache first, then the
/// persistent file that survives restarts.
pub(crate) async fn read_app_heartbeat(
    cache: &Cache,
    heartbeat_file: &str,
) -> Option<DateTime<Utc>> {
    if let Some(raw) = cache.get::<String>(&keys::app_heartbeat()).await {
        if let Some(ts) = parse_heartbeat_timestamp(&raw) {
            return Some(ts);
        }
    }

    match tokio::fs::read_to_string(heartbeat_file).await {
        Ok(raw) => parse_heartbeat_timestamp(&raw),
        Err(_) => None,
    }
}

/// Tracks host liveness by SSH probe and agent push, and records that the
/// monitoring app itself is alive.
pub struct HeartbeatService {
    database: Arc<Database>,
    cache: Arc<Cache>,
    ssh: Arc<SshExecutor>,
    connection: Arc<ConnectionAlerter>,
    app_heartbeat_file: String,
}

impl HeartbeatService {
    pub fn new(
        database: Arc<Database>,
        cache: Arc<Cache>,
        ssh: Arc<SshExecutor>,
        connection: Arc<ConnectionAlerter>,
        app_heartbeat_file: String,
    ) -> Self {
        Self {
            database,
            cache,
            ssh,
            connection,
            app_heartbeat_file,
        }
    }

    /// Pull path: a short SSH dial. Success refreshes the heartbeat; either
    /// outcome feeds the connection alerter.
    pub async fn probe_host(&self, host: &Host) -> Result<bool> {
        if let Some(config) = self.database.get_monitoring_config(host.id).await? {
            if config.suspended {
                debug!("Skipping heartbeat probe for {} - monitoring suspended", host.name);
                return Ok(false);
            }
        }

        let timeout = Duration::from_secs(scheduler::HEARTBEAT_TIMEOUT_SECONDS);

        match self.ssh.probe(host, timeout).await {
            Ok(()) => {
                self.database
                    .upsert_heartbeat(host.id, Utc::now(), None)
                    .await?;
                self.connection.handle_probe_success(host).await?;
                debug!("Heartbeat probe succeeded for {}", host.name);
                Ok(true)
            }
            Err(e) => {
                debug!("Heartbeat probe failed for {}: {}", host.name, e);
                self.connection.handle_probe_failure(host).await?;
                Ok(false)
            }
        }
    }

    /// Push path: an agent beat landed on the API.
    pub async fn record_push(
        &self,
        host: &Host,
        agent_version: Option<&str>,
    ) -> Result<Heartbeat> {
        let heartbeat = self
            .database
            .upsert_heartbeat(host.id, Utc::now(), agent_version)
            .await?;
        self.connection.handle_probe_success(host).await?;
        Ok(heartbeat)
    }

    /// Write the app heartbeat to the cache and the persistent file.
    pub async fn write_app_heartbeat(&self) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.cache
            .put(&keys::app_heartbeat(), &now, cache_ttl::APP_HEARTBEAT)
            .await;

        if let Err(e) = tokio::fs::write(&self.app_heartbeat_file, &now).await {
            warn!(
                "Failed to persist app heartbeat to {}: {}",
                self.app_heartbeat_file, e
            );
        }

        Ok(())
    }

    /// Scan the host for running systemd services and register them. The
    /// scan never flips monitoring toggles on rediscovered services.
    pub async fn discover_services(&self, host: &Host) -> Result<usize> {
        let output = self
            .ssh
            .execute(
                host,
                "systemctl list-units --type=service --state=running --no-pager --no-legend 2>/dev/null",
                Duration::from_secs(scheduler::SERVICE_CHECK_TIMEOUT_SECONDS),
            )
            .await?;

        let mut count = 0;
        for line in output.stdout.lines().take(20) {
            let Some(unit) = line.split_whitespace().next() else {
                continue;
            };
            if !unit.ends_with(".service") {
                continue;
            }
            let name = unit.trim_end_matches(".service");

            self.database
                .upsert_service(host.id, name, ServiceState::Running, "systemd")
                .await?;
            count += 1;
        }

        info!("Discovered {} running services on {}", count, host.name);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeat_timestamp() {
        let ts = parse_heartbeat_timestamp("2025-06-01T12:00:00+00:00").unwrap();
        assert_eq!(ts.timestamp(), 1748779200);
        assert!(parse_heartbeat_timestamp("garbage").is_none());
        assert!(parse_heartbeat_timestamp("").is_none());
    }

    #[tokio::test]
    async fn test_read_app_heartbeat_prefers_cache() {
        let cache = Cache::new();
        let now = Utc::now();
        cache
            .put(&keys::app_heartbeat(), &now.to_rfc3339(), 300)
            .await;

        let read = read_app_heartbeat(&cache, "/nonexistent/heartbeat").await.unwrap();
        assert_eq!(read.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_read_app_heartbeat_falls_back_to_file() {
        let cache = Cache::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.txt");
        let now = Utc::now();
        tokio::fs::write(&path, now.to_rfc3339()).await.unwrap();

        let read = read_app_heartbeat(&cache, path.to_str().unwrap()).await.unwrap();
        assert_eq!(read.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_read_app_heartbeat_absent_everywhere() {
        let cache = Cache::new();
        assert!(read_app_heartbeat(&cache, "/nonexistent/heartbeat").await.is_none());
    }
}
