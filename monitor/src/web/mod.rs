pub mod handlers;
pub mod server;

pub use server::start_web_server;

use serde::Serialize;
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::database::Database;
use crate::heartbeat::{HeartbeatService, StatusCalculator};
use crate::ssh::SshExecutor;
use crate::status::AnomalyStatusService;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub database: Arc<Database>,
    pub cache: Arc<Cache>,
    pub status_service: Arc<AnomalyStatusService>,
    pub status_calculator: Arc<StatusCalculator>,
    pub heartbeat: Arc<HeartbeatService>,
    pub ssh: Arc<SshExecutor>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        database: Arc<Database>,
        cache: Arc<Cache>,
        status_service: Arc<AnomalyStatusService>,
        status_calculator: Arc<StatusCalculator>,
        heartbeat: Arc<HeartbeatService>,
        ssh: Arc<SshExecutor>,
    ) -> Self {
        Self {
            config,
            database,
            cache,
            status_service,
            status_calculator,
            heartbeat,
            ssh,
        }
    }
}

/// Row in the live-metrics response.
#[derive(Debug, Clone, Serialize)]
pub struct LiveMetricRow {
    pub server_id: i64,
    pub server_name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// KB/s
    pub disk_io_read: f64,
    /// KB/s
    pub net_io_sent: f64,
    pub timestamp: String,
    pub status: String,
}

/// Host summary for the fleet listing.
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub key_deployed: bool,
    pub status: String,
    pub monitoring_enabled: bool,
    pub monitoring_suspended: bool,
    pub alerts_suppressed: bool,
}
