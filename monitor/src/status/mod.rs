//! Anomaly status summaries with read-through cache reconciliation.

use crate::cache::{keys, Cache};
use crate::constants::cache_ttl;
use crate::database::Database;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Summary served to dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalySummary {
    pub active: i64,
    pub highest_severity: String,
    pub timestamp: String,
    pub details: SummaryDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryDetails {
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub network: String,
}

impl SummaryDetails {
    fn all_normal() -> Self {
        Self {
            cpu: "normal".to_string(),
            memory: "normal".to_string(),
            disk: "normal".to_string(),
            network: "normal".to_string(),
        }
    }
}

impl AnomalySummary {
    /// The fallback served when computation fails; dashboards never see a
    /// 500 from the anomaly-status endpoint.
    pub fn ok() -> Self {
        Self {
            active: 0,
            highest_severity: "OK".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            details: SummaryDetails::all_normal(),
        }
    }
}

fn severity_rank(severity: &str) -> u8 {
    match severity.to_uppercase().as_str() {
        "CRITICAL" => 4,
        "HIGH" => 3,
        "MEDIUM" => 2,
        "LOW" => 1,
        _ => 0,
    }
}

/// Computes per-host anomaly summaries and keeps them consistent with the
/// cache.
pub struct AnomalyStatusService {
    database: Arc<Database>,
    cache: Arc<Cache>,
}

impl AnomalyStatusService {
    pub fn new(database: Arc<Database>, cache: Arc<Cache>) -> Self {
        Self { database, cache }
    }

    /// Compute a fresh summary from the unresolved anomalies.
    pub async fn compute_summary(&self, host_id: i64) -> Result<AnomalySummary> {
        let unresolved = self.database.unresolved_for_host(host_id).await?;

        let mut details = SummaryDetails::all_normal();
        let mut highest = "OK".to_string();

        for anomaly in &unresolved {
            let metric_type = anomaly.metric_type.to_lowercase();
            let flag = match metric_type.as_str() {
                t if t.starts_with("cpu") => &mut details.cpu,
                t if t.starts_with("memory") || t == "ram" => &mut details.memory,
                t if t.starts_with("disk") => &mut details.disk,
                t if t.starts_with("network") => &mut details.network,
                _ => continue,
            };
            *flag = "anomaly".to_string();

            let severity = anomaly.severity.as_str();
            if severity_rank(severity) > severity_rank(&highest) {
                highest = severity.to_string();
            }
        }

        Ok(AnomalySummary {
            active: unresolved.len() as i64,
            highest_severity: highest,
            timestamp: Utc::now().to_rfc3339(),
            details,
        })
    }

    /// Compute and cache a summary.
    pub async fn refresh_and_cache(&self, host_id: i64) -> Result<AnomalySummary> {
        let summary = self.compute_summary(host_id).await?;
        self.cache
            .put(
                &keys::anomaly_summary(host_id),
                &summary,
                cache_ttl::ANOMALY_SUMMARY,
            )
            .await;
        Ok(summary)
    }

    /// Read-through summary lookup.
    ///
    /// A cached summary is only served when its active count matches the
    /// store and its severity is consistent; anything stale is dropped and
    /// recomputed so resolutions show up immediately.
    pub async fn summary(&self, host_id: i64) -> Result<AnomalySummary> {
        let actual_active = self.database.unresolved_count(host_id).await?;

        if let Some(cached) = self
            .cache
            .get::<AnomalySummary>(&keys::anomaly_summary(host_id))
            .await
        {
            let severity_consistent =
                !(actual_active == 0 && cached.highest_severity.to_uppercase() != "OK");

            if cached.active == actual_active && severity_consistent {
                return Ok(cached);
            }

            debug!(
                "Anomaly summary cache stale for host {} (cached {}, actual {})",
                host_id, cached.active, actual_active
            );
            self.cache.delete(&keys::anomaly_summary(host_id)).await;
        }

        self.refresh_and_cache(host_id).await
    }

    /// Drop the cached summary; the next read recomputes.
    pub async fn invalidate(&self, host_id: i64) {
        self.cache.delete(&keys::anomaly_summary(host_id)).await;
    }
}
