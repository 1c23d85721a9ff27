//! Service status checks and service-down alerts.
//!
//! A non-failed outage alerts after two consecutive failed checks; a unit
//! systemd reports as `failed` alerts immediately. One alert per failure
//! episode, cleared by the recovery event.

use super::Notifier;
use crate::cache::{keys, Cache};
use crate::constants::{alerts, cache_ttl, scheduler};
use crate::database::{
    AlertStatus, Database, Host, NewAlertRecord, ServiceRecord, ServiceState,
};
use crate::ssh::SshExecutor;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ServiceChecker {
    database: Arc<Database>,
    cache: Arc<Cache>,
    ssh: Arc<SshExecutor>,
    notifier: Arc<Notifier>,
}

impl ServiceChecker {
    pub fn new(
        database: Arc<Database>,
        cache: Arc<Cache>,
        ssh: Arc<SshExecutor>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            database,
            cache,
            ssh,
            notifier,
        }
    }

    /// Check every monitored service on a host.
    pub async fn check_host_services(&self, host: &Host) -> Result<()> {
        let Some(config) = self.database.get_monitoring_config(host.id).await? else {
            return Ok(());
        };
        if !config.enabled || config.suspended {
            debug!("Skipping service checks for {} - monitoring off", host.name);
            return Ok(());
        }

        let services = self.database.monitored_services(host.id).await?;
        for service in services {
            if let Err(e) = self.check_service(host, &service).await {
                warn!(
                    "Service check failed for {} on {}: {}",
                    service.name, host.name, e
                );
            }
        }

        Ok(())
    }

    /// Check one service and drive the alert state machine.
    pub async fn check_service(&self, host: &Host, service: &ServiceRecord) -> Result<ServiceState> {
        let timeout = Duration::from_secs(scheduler::SERVICE_CHECK_TIMEOUT_SECONDS);

        let output = self
            .ssh
            .execute(
                host,
                &format!("systemctl is-active {} 2>/dev/null", service.name),
                timeout,
            )
            .await?;

        let is_active = output.stdout.trim() == "active";
        let failure_key = keys::service_failure_count(host.id, &service.name);
        let alert_sent_key = keys::service_alert_sent(host.id, &service.name);

        if is_active {
            self.cache.delete(&failure_key).await;

            // Recovery edge: the service was previously seen down
            if matches!(service.status, ServiceState::Stopped | ServiceState::Failed) {
                let alerted: bool = self.cache.get(&alert_sent_key).await.unwrap_or(false);
                if alerted {
                    self.send_service_event(host, &service.name, false).await?;
                }
                self.cache.delete(&alert_sent_key).await;
            }

            self.database
                .update_service_status(host.id, &service.name, ServiceState::Running)
                .await?;
            return Ok(ServiceState::Running);
        }

        // Down: distinguish a crashed unit from a stopped one
        let failed_output = self
            .ssh
            .execute(
                host,
                &format!("systemctl is-failed {} 2>/dev/null", service.name),
                timeout,
            )
            .await?;
        let is_failed = failed_output.stdout.trim() == "failed";

        let failure_count: u32 = self.cache.get(&failure_key).await.unwrap_or(0) + 1;
        self.cache
            .put(&failure_key, &failure_count, cache_ttl::SERVICE_FAILURE_COUNT)
            .await;

        let should_alert = if is_failed {
            info!(
                "Service {} on {} is in FAILED state",
                service.name, host.name
            );
            true
        } else if failure_count >= alerts::SERVICE_FAILURES_BEFORE_ALERT {
            info!(
                "Service {} on {} down for {} consecutive checks",
                service.name, host.name, failure_count
            );
            true
        } else {
            debug!(
                "Service {} on {} down, check {}/{}",
                service.name,
                host.name,
                failure_count,
                alerts::SERVICE_FAILURES_BEFORE_ALERT
            );
            false
        };

        if should_alert {
            let already_sent: bool = self.cache.get(&alert_sent_key).await.unwrap_or(false);
            if !already_sent {
                self.send_service_event(host, &service.name, true).await?;
                self.cache
                    .put(&alert_sent_key, &true, cache_ttl::SERVICE_ALERT_SENT)
                    .await;
            }
        }

        let state = if is_failed {
            ServiceState::Failed
        } else {
            ServiceState::Stopped
        };
        self.database
            .update_service_status(host.id, &service.name, state)
            .await?;

        Ok(state)
    }

    async fn send_service_event(&self, host: &Host, service_name: &str, down: bool) -> Result<()> {
        let Some(config) = self.database.get_monitoring_config(host.id).await? else {
            return Ok(());
        };
        if !config.enabled || config.suspended || config.alerts_suppressed {
            return Ok(());
        }

        let (subject, body, status) = if down {
            (
                format!("Service Alert: {} is DOWN on {}", service_name, host.name),
                format!(
                    "Service Monitoring Alert\n\nService: {}\nServer: {} ({})\nStatus: DOWN\nTime: {}\n\n\
                     Please investigate and restore the service.\n",
                    service_name,
                    host.name,
                    host.address,
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                ),
                AlertStatus::Triggered,
            )
        } else {
            (
                format!("Service Resolved: {} is UP on {}", service_name, host.name),
                format!(
                    "Service Monitoring Alert - Resolved\n\nService: {}\nServer: {} ({})\nStatus: UP\nTime: {}\n\n\
                     The service has been restored and is now running.\n",
                    service_name,
                    host.name,
                    host.address,
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                ),
                AlertStatus::Resolved,
            )
        };

        self.notifier.email(&subject, &body).await;

        self.notifier
            .record(&NewAlertRecord {
                host_id: host.id,
                alert_type: "SERVICE".to_string(),
                status,
                value: 0.0,
                threshold: alerts::SERVICE_FAILURES_BEFORE_ALERT as f64,
                message: format!(
                    "Service {} is {}",
                    service_name,
                    if down { "DOWN" } else { "UP" }
                ),
                recipients: self.notifier.recipients_string(),
                resolved_at: if down { None } else { Some(Utc::now()) },
            })
            .await?;

        Ok(())
    }
}
