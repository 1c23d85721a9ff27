use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::cache::keys;
use crate::constants::{api, cache_ttl};
use crate::database::hosts::ThresholdUpdate;
use crate::database::{NewHost, Sample};
use crate::web::{AppState, HostSummary, LiveMetricRow};

// Helper type for API responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

fn not_found(entity: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(format!("{} not found", entity))),
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error(message.into())),
    )
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(err.to_string())),
    )
}

#[derive(Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub range: Option<String>,
}

/// Map a range token onto hours. Unknown tokens fall back to one hour so a
/// misspelled dashboard query still renders something.
fn range_to_hours(range: Option<&str>) -> i64 {
    match range.unwrap_or("1h").to_lowercase().as_str() {
        "1h" => 1,
        "24h" => 24,
        "7d" => 7 * 24,
        "30d" | "1m" => 30 * 24,
        "90d" | "3m" => 90 * 24,
        _ => 1,
    }
}

/// Downsample to at most `max_points`, always keeping the first and last
/// points and anything spiking past the keep threshold.
fn downsample(samples: &[Sample], max_points: usize) -> Vec<&Sample> {
    if samples.len() <= max_points {
        return samples.iter().collect();
    }

    let step = (samples.len() / max_points).max(1);
    let last = samples.len() - 1;

    let mut kept = Vec::with_capacity(max_points + 8);
    for (i, sample) in samples.iter().enumerate() {
        let spike = sample.cpu_percent > api::SPIKE_KEEP_PERCENT
            || sample.memory_percent > api::SPIKE_KEEP_PERCENT;
        if i == 0 || i == last || spike || i % step == 0 {
            kept.push(sample);
        }
    }

    kept
}

// === LIVE DASHBOARD READS ===

pub async fn get_live_metrics(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    let hosts = match state.database.enabled_hosts().await {
        Ok(hosts) => hosts,
        Err(e) => return Err(internal(e)),
    };

    let mut rows = Vec::new();

    for (host, _config) in hosts {
        // Cache first, store fallback
        let sample: Option<Sample> = match state.cache.get(&keys::latest_sample(host.id)).await {
            Some(sample) => Some(sample),
            None => match state.database.latest_sample(host.id).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("Live metrics store read failed for {}: {}", host.name, e);
                    None
                }
            },
        };

        let status = state
            .status_calculator
            .status(host.id)
            .await
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| "offline".to_string());

        if let Some(sample) = sample {
            let disk_percent = sample
                .disk_usage
                .get("/")
                .map(|d| d.percent)
                .unwrap_or(0.0);

            rows.push(LiveMetricRow {
                server_id: host.id,
                server_name: host.name.clone(),
                cpu_percent: sample.cpu_percent,
                memory_percent: sample.memory_percent,
                disk_percent,
                disk_io_read: (sample.disk_io_read.unwrap_or(0.0) / 1024.0).round(),
                net_io_sent: (sample.net_io_sent.unwrap_or(0.0) / 1024.0).round(),
                timestamp: sample.timestamp.to_rfc3339(),
                status,
            });
        }
    }

    Ok(Json(json!({ "metrics": rows })))
}

pub async fn get_server_metrics(
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let since = Utc::now() - Duration::hours(range_to_hours(query.range.as_deref()));
    let samples = state
        .database
        .samples_since(id, since)
        .await
        .map_err(internal)?;

    let kept = downsample(&samples, api::MAX_SERIES_POINTS);

    let timestamps: Vec<String> = kept.iter().map(|s| s.timestamp.to_rfc3339()).collect();
    let cpu: Vec<f64> = kept.iter().map(|s| s.cpu_percent).collect();
    let memory: Vec<f64> = kept.iter().map(|s| s.memory_percent).collect();
    let disk: Vec<f64> = kept.iter().map(|s| s.max_disk_percent()).collect();

    Ok(Json(json!({
        "timestamps": timestamps,
        "cpu": cpu,
        "memory": memory,
        "disk": disk,
    })))
}

pub async fn get_metric_history(
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let since = Utc::now() - Duration::hours(range_to_hours(query.range.as_deref()));
    let samples = state
        .database
        .samples_since(id, since)
        .await
        .map_err(internal)?;
    let kept = downsample(&samples, api::MAX_SERIES_POINTS);

    let timestamps: Vec<String> = kept.iter().map(|s| s.timestamp.to_rfc3339()).collect();
    let cpu: Vec<f64> = kept.iter().map(|s| s.cpu_percent).collect();
    let memory: Vec<f64> = kept.iter().map(|s| s.memory_percent).collect();
    let disk: Vec<Option<f64>> = kept
        .iter()
        .map(|s| {
            if s.disk_usage.is_empty() {
                None
            } else {
                Some(s.max_disk_percent())
            }
        })
        .collect();

    let anomalies = state
        .database
        .anomalies_since(id, since)
        .await
        .map_err(internal)?;
    let anomaly_points: Vec<Value> = anomalies
        .iter()
        .map(|a| {
            json!({
                "timestamp": a.timestamp.to_rfc3339(),
                "metric_name": a.metric_name,
                "metric_type": a.metric_type,
                "severity": a.severity.as_str(),
                "metric_value": a.metric_value,
            })
        })
        .collect();

    Ok(Json(json!({
        "timestamps": timestamps,
        "cpu": cpu,
        "memory": memory,
        "disk": disk,
        "anomalies": anomaly_points,
    })))
}

pub async fn get_disk_io(
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let since = Utc::now() - Duration::hours(range_to_hours(query.range.as_deref()));
    let samples = state
        .database
        .samples_since(id, since)
        .await
        .map_err(internal)?;
    let kept = downsample(&samples, api::MAX_SERIES_POINTS);

    const MB: f64 = 1024.0 * 1024.0;
    let timestamps: Vec<String> = kept.iter().map(|s| s.timestamp.to_rfc3339()).collect();
    let read: Vec<f64> = kept
        .iter()
        .map(|s| s.disk_io_read.unwrap_or(0.0) / MB)
        .collect();
    let write: Vec<f64> = kept
        .iter()
        .map(|s| s.disk_io_write.unwrap_or(0.0) / MB)
        .collect();

    Ok(Json(json!({
        "timestamps": timestamps,
        "read": read,
        "write": write,
    })))
}

pub async fn get_network_io(
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let since = Utc::now() - Duration::hours(range_to_hours(query.range.as_deref()));
    let samples = state
        .database
        .samples_since(id, since)
        .await
        .map_err(internal)?;
    let kept = downsample(&samples, api::MAX_SERIES_POINTS);

    const MB: f64 = 1024.0 * 1024.0;
    let timestamps: Vec<String> = kept.iter().map(|s| s.timestamp.to_rfc3339()).collect();
    let sent: Vec<f64> = kept
        .iter()
        .map(|s| s.net_io_sent.unwrap_or(0.0) / MB)
        .collect();
    let recv: Vec<f64> = kept
        .iter()
        .map(|s| s.net_io_recv.unwrap_or(0.0) / MB)
        .collect();

    Ok(Json(json!({
        "timestamps": timestamps,
        "sent": sent,
        "recv": recv,
    })))
}

/// Anomaly status never fails outward: errors collapse to a synthetic OK
/// summary so dashboards keep rendering.
pub async fn get_anomaly_status(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Json<Value> {
    match state.database.get_host(id).await {
        Ok(Some(_)) => {}
        _ => {
            return Json(serde_json::to_value(crate::status::AnomalySummary::ok()).unwrap_or(json!({})));
        }
    }

    match state.status_service.summary(id).await {
        Ok(summary) => Json(serde_json::to_value(summary).unwrap_or(json!({}))),
        Err(e) => {
            error!("Anomaly status failed for host {}: {}", id, e);
            Json(serde_json::to_value(crate::status::AnomalySummary::ok()).unwrap_or(json!({})))
        }
    }
}

// === HEARTBEAT INGEST ===

#[derive(Deserialize, Default)]
struct HeartbeatBody {
    agent_version: Option<String>,
}

pub async fn post_heartbeat(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<ApiResponse<()>>)> {
    let Some(host) = state.database.get_host(id).await.map_err(internal)? else {
        return Err(not_found("Server"));
    };

    let payload: HeartbeatBody = if body.is_empty() {
        HeartbeatBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };

    let heartbeat = state
        .heartbeat
        .record_push(&host, payload.agent_version.as_deref())
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "status": "ok",
        "server_id": host.id,
        "server_name": host.name,
        "heartbeat_received": true,
        "timestamp": heartbeat.last_heartbeat.to_rfc3339(),
    })))
}

// === ANOMALY ACTIONS ===

pub async fn resolve_anomaly(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    let anomaly = state
        .database
        .resolve_anomaly(id, Utc::now())
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Anomaly"))?;

    state.status_service.invalidate(anomaly.host_id).await;
    info!("Anomaly {} resolved via API", id);

    Ok(Json(ApiResponse::success(json!({
        "id": anomaly.id,
        "resolved": anomaly.resolved,
        "resolved_at": anomaly.resolved_at.map(|t| t.to_rfc3339()),
    }))))
}

#[derive(Deserialize)]
pub struct BulkResolveBody {
    pub ids: Vec<i64>,
}

pub async fn bulk_resolve_anomalies(
    State(state): State<AppState>,
    Json(body): Json<BulkResolveBody>,
) -> ApiResult<Value> {
    if body.ids.is_empty() {
        return Err(bad_request("ids must not be empty"));
    }

    // Invalidate the summary for every affected host
    let mut host_ids = Vec::new();
    for id in &body.ids {
        if let Ok(Some(anomaly)) = state.database.get_anomaly(*id).await {
            if !host_ids.contains(&anomaly.host_id) {
                host_ids.push(anomaly.host_id);
            }
        }
    }

    let resolved = state
        .database
        .bulk_resolve_anomalies(&body.ids)
        .await
        .map_err(internal)?;

    for host_id in host_ids {
        state.status_service.invalidate(host_id).await;
    }

    info!("Bulk-resolved {} anomalies via API", resolved);
    Ok(Json(ApiResponse::success(json!({ "resolved": resolved }))))
}

// === HOST MANAGEMENT ===

pub async fn list_hosts(State(state): State<AppState>) -> ApiResult<Vec<HostSummary>> {
    let hosts = state.database.list_hosts().await.map_err(internal)?;

    let mut summaries = Vec::new();
    for host in hosts {
        let config = state
            .database
            .get_monitoring_config(host.id)
            .await
            .map_err(internal)?;

        let status = state
            .status_calculator
            .status(host.id)
            .await
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| "offline".to_string());

        summaries.push(HostSummary {
            id: host.id,
            name: host.name,
            address: host.address,
            ssh_port: host.ssh_port,
            ssh_user: host.ssh_user,
            key_deployed: host.key_deployed,
            status,
            monitoring_enabled: config.as_ref().map(|c| c.enabled).unwrap_or(false),
            monitoring_suspended: config.as_ref().map(|c| c.suspended).unwrap_or(false),
            alerts_suppressed: config.as_ref().map(|c| c.alerts_suppressed).unwrap_or(false),
        });
    }

    Ok(Json(ApiResponse::success(summaries)))
}

#[derive(Deserialize)]
pub struct CreateHostBody {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    /// One-shot password used to deploy the server key
    pub password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

pub async fn create_host(
    State(state): State<AppState>,
    Json(body): Json<CreateHostBody>,
) -> ApiResult<Value> {
    if body.name.trim().is_empty() || body.address.trim().is_empty() {
        return Err(bad_request("name and address are required"));
    }
    if state
        .database
        .get_host_by_name(&body.name)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(bad_request(format!("Host '{}' already exists", body.name)));
    }

    let host = state
        .database
        .create_host(&NewHost {
            name: body.name.trim().to_string(),
            address: body.address.trim().to_string(),
            ssh_port: body.ssh_port,
            ssh_user: body.ssh_user.trim().to_string(),
        })
        .await
        .map_err(internal)?;

    let mut key_deployed = false;
    if let Some(password) = body.password.as_deref() {
        match state.ssh.bootstrap_key(&host, password).await {
            Ok(()) => {
                state
                    .database
                    .mark_key_deployed(host.id)
                    .await
                    .map_err(internal)?;
                key_deployed = true;

                if let Err(e) = state.ssh.ensure_probe_dependencies(&host).await {
                    warn!("Probe dependency setup failed for {}: {}", host.name, e);
                }
            }
            Err(e) => {
                warn!("Key bootstrap failed for {}: {}", host.name, e);
            }
        }
    }

    Ok(Json(ApiResponse::success(json!({
        "id": host.id,
        "name": host.name,
        "key_deployed": key_deployed,
    }))))
}

pub async fn delete_host(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    state.database.delete_host(id).await.map_err(internal)?;

    // Drop the per-host cache entries eagerly
    state.cache.delete(&keys::latest_sample(id)).await;
    state.cache.delete(&keys::alert_state(id)).await;
    state.cache.delete(&keys::anomaly_summary(id)).await;
    state.cache.delete(&keys::connection_state(id)).await;

    Ok(Json(ApiResponse::success(json!({ "deleted": id }))))
}

pub async fn get_alert_history(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let records = state
        .database
        .alert_history(id, 100)
        .await
        .map_err(internal)?;

    Ok(Json(ApiResponse::success(json!({ "alerts": records }))))
}

// === MONITORING CONFIGURATION ===

pub async fn update_thresholds(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(update): Json<ThresholdUpdate>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let config = state
        .database
        .update_thresholds(id, &update)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    info!("Thresholds updated for host {}", id);
    Ok(Json(ApiResponse::success(json!({
        "cpu_threshold": config.cpu_threshold,
        "memory_threshold": config.memory_threshold,
        "disk_threshold": config.disk_threshold,
        "disk_io_threshold": config.disk_io_threshold,
        "network_io_threshold": config.network_io_threshold,
        "collection_interval_seconds": config.collection_interval_seconds,
    }))))
}

#[derive(Deserialize)]
pub struct MonitoredDisksBody {
    pub disks: Vec<String>,
}

pub async fn update_monitored_disks(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<MonitoredDisksBody>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    state
        .database
        .update_monitored_disks(id, body.disks)
        .await
        .map_err(internal)?;

    let config = state
        .database
        .get_monitoring_config(id)
        .await
        .map_err(internal)?;

    Ok(Json(ApiResponse::success(json!({
        "monitored_disks": config.map(|c| c.monitored_disks).unwrap_or_default(),
    }))))
}

pub async fn toggle_monitoring(
    Path((id, action)): Path<(i64, String)>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let suspend = match action.as_str() {
        "suspend" => true,
        "resume" => false,
        _ => return Err(bad_request("Invalid action. Use 'suspend' or 'resume'.")),
    };

    state
        .database
        .set_suspended(id, suspend)
        .await
        .map_err(internal)?;

    // Reset connection state and open the quiet window so the toggle
    // itself never produces connection alerts
    state.cache.delete(&keys::connection_state(id)).await;
    let epoch_key = if suspend {
        keys::suspend_epoch(id)
    } else {
        keys::resume_epoch(id)
    };
    state
        .cache
        .put(
            &epoch_key,
            &Utc::now().to_rfc3339(),
            cache_ttl::SUSPEND_RESUME_EPOCH,
        )
        .await;

    Ok(Json(ApiResponse::success(json!({
        "suspended": suspend,
    }))))
}

pub async fn toggle_alert_suppression(
    Path((id, action)): Path<(i64, String)>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let suppress = match action.as_str() {
        "suppress" => true,
        "resume" => false,
        _ => return Err(bad_request("Invalid action. Use 'suppress' or 'resume'.")),
    };

    state
        .database
        .set_alerts_suppressed(id, suppress)
        .await
        .map_err(internal)?;

    Ok(Json(ApiResponse::success(json!({
        "alerts_suppressed": suppress,
    }))))
}

// === SERVICE MONITORING ===

pub async fn list_services(Path(id): Path<i64>, State(state): State<AppState>) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let services = state.database.list_services(id).await.map_err(internal)?;
    Ok(Json(ApiResponse::success(json!({ "services": services }))))
}

pub async fn toggle_service_monitoring(
    Path((id, name, action)): Path<(i64, String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    if state.database.get_host(id).await.map_err(internal)?.is_none() {
        return Err(not_found("Server"));
    }

    let enable = match action.as_str() {
        "enable" => true,
        "disable" => false,
        _ => return Err(bad_request("Invalid action. Use 'enable' or 'disable'.")),
    };

    // Toggles only this host's service; same-named services elsewhere are
    // untouched
    let updated = state
        .database
        .set_service_monitoring(id, &name, enable)
        .await
        .map_err(internal)?;

    if !updated {
        return Err(not_found("Service"));
    }

    Ok(Json(ApiResponse::success(json!({
        "service": name,
        "monitoring_enabled": enable,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_with(cpu: f64, memory: f64) -> Sample {
        Sample {
            id: 0,
            host_id: 1,
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_percent: memory,
            swap_percent: None,
            disk_usage: HashMap::new(),
            network_io: HashMap::new(),
            disk_io_read: None,
            disk_io_write: None,
            net_io_sent: None,
            net_io_recv: None,
            load_avg_1m: None,
            load_avg_5m: None,
            load_avg_15m: None,
            network_connections: None,
            system_uptime_seconds: None,
            top_processes: None,
        }
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(range_to_hours(Some("1h")), 1);
        assert_eq!(range_to_hours(Some("24h")), 24);
        assert_eq!(range_to_hours(Some("7d")), 168);
        assert_eq!(range_to_hours(Some("1m")), 720);
        assert_eq!(range_to_hours(Some("30d")), 720);
        assert_eq!(range_to_hours(Some("3m")), 2160);
        assert_eq!(range_to_hours(Some("bogus")), 1);
        assert_eq!(range_to_hours(None), 1);
    }

    #[test]
    fn test_downsample_short_series_untouched() {
        let samples: Vec<Sample> = (0..10).map(|_| sample_with(10.0, 20.0)).collect();
        assert_eq!(downsample(&samples, 500).len(), 10);
    }

    #[test]
    fn test_downsample_caps_and_keeps_edges() {
        let samples: Vec<Sample> = (0..2000).map(|_| sample_with(10.0, 20.0)).collect();
        let kept = downsample(&samples, 500);

        assert!(kept.len() <= 510, "kept {} points", kept.len());
        assert!(std::ptr::eq(kept[0], &samples[0]));
        assert!(std::ptr::eq(*kept.last().unwrap(), &samples[1999]));
    }

    #[test]
    fn test_downsample_preserves_spikes() {
        let mut samples: Vec<Sample> = (0..2000).map(|_| sample_with(10.0, 20.0)).collect();
        samples[1337] = sample_with(95.0, 20.0);
        let kept = downsample(&samples, 500);

        assert!(kept.iter().any(|s| s.cpu_percent > 90.0));
    }
}
