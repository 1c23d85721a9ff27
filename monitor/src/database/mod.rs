pub mod alerts;
pub mod anomalies;
pub mod heartbeats;
pub mod hosts;
pub mod samples;
pub mod services;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{error, info};

/// A monitored host. Owns its config, samples, anomalies, alert history,
/// heartbeat, and services; deleting a host cascades to all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub key_deployed: bool,
    pub key_deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewHost {
    pub name: String,
    pub address: String,
    pub ssh_port: u16,
    pub ssh_user: String,
}

/// Per-host monitoring settings, created atomically with the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub host_id: i64,
    pub enabled: bool,
    pub suspended: bool,
    pub alerts_suppressed: bool,
    pub collection_interval_seconds: u64,
    pub anomaly_detection_interval_seconds: u64,
    pub adaptive_collection_enabled: bool,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
    pub disk_io_threshold: Option<f64>,
    pub network_io_threshold: Option<f64>,
    pub detection_window: u32,
    pub threshold_factor: f64,
    pub correlation_threshold_factor: f64,
    pub retention_days: u32,
    /// Mountpoints shown on dashboards; "/" is always present.
    pub monitored_disks: Vec<String>,
    pub use_llm_explanation: bool,
}

impl MonitoringConfig {
    pub fn defaults_for(host_id: i64) -> Self {
        Self {
            host_id,
            enabled: true,
            suspended: false,
            alerts_suppressed: false,
            collection_interval_seconds: 30,
            anomaly_detection_interval_seconds: 15,
            adaptive_collection_enabled: false,
            cpu_threshold: 80.0,
            memory_threshold: 90.0,
            disk_threshold: 90.0,
            disk_io_threshold: None,
            network_io_threshold: None,
            detection_window: 30,
            threshold_factor: 2.0,
            correlation_threshold_factor: 2.0,
            retention_days: 30,
            monitored_disks: vec!["/".to_string()],
            use_llm_explanation: false,
        }
    }
}

/// Per-mountpoint usage as reported by the probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub fstype: String,
    #[serde(default)]
    pub disk_type: String,
    #[serde(default)]
    pub raid: String,
    #[serde(default)]
    pub physical_disk: String,
}

/// Cumulative per-interface counters as reported by the probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceIo {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// One timestamped snapshot of host metrics. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub host_id: i64,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: Option<f64>,
    pub disk_usage: HashMap<String, DiskUsage>,
    pub network_io: HashMap<String, InterfaceIo>,
    /// Rates in bytes per second
    pub disk_io_read: Option<f64>,
    pub disk_io_write: Option<f64>,
    pub net_io_sent: Option<f64>,
    pub net_io_recv: Option<f64>,
    pub load_avg_1m: Option<f64>,
    pub load_avg_5m: Option<f64>,
    pub load_avg_15m: Option<f64>,
    pub network_connections: Option<i64>,
    pub system_uptime_seconds: Option<f64>,
    pub top_processes: Option<serde_json::Value>,
}

impl Sample {
    /// Highest usage percent across all monitored partitions.
    pub fn max_disk_percent(&self) -> f64 {
        self.disk_usage
            .values()
            .map(|d| d.percent)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted detector finding for one metric on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: i64,
    pub host_id: i64,
    pub sample_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub metric_type: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub severity: Severity,
    pub anomaly_score: f64,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub explanation: Option<String>,
    pub llm_generated: bool,
    pub correlation: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewAnomaly {
    pub host_id: i64,
    pub sample_id: Option<i64>,
    pub metric_type: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub severity: Severity,
    pub anomaly_score: f64,
    pub correlation: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    #[serde(rename = "triggered")]
    Triggered,
    #[serde(rename = "resolved")]
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Triggered => "triggered",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// One notification event in the append-only alert history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub host_id: i64,
    pub alert_type: String,
    pub status: AlertStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub recipients: String,
    pub sent_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRecord {
    pub host_id: i64,
    pub alert_type: String,
    pub status: AlertStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub recipients: String,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub host_id: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
            ServiceState::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ServiceState::Running,
            "stopped" => ServiceState::Stopped,
            "failed" => ServiceState::Failed,
            _ => ServiceState::Unknown,
        }
    }
}

/// A systemd unit tracked on one specific host. Monitoring toggles are
/// per-host; an identically named service on another host is unrelated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub host_id: i64,
    pub name: String,
    pub status: ServiceState,
    pub service_type: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub monitoring_enabled: bool,
}

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Database path: {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create parent directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);

        let pool = match SqlitePool::connect(&database_url).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to connect to database at {}: {}", database_path, e);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;
        info!("Database initialized");

        Ok(database)
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same memory store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let database = Self { pool };
        database.initialize_tables().await?;
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let statements: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL,
                ssh_port INTEGER NOT NULL DEFAULT 22,
                ssh_user TEXT NOT NULL,
                key_deployed BOOLEAN NOT NULL DEFAULT 0,
                key_deployed_at DATETIME
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS monitoring_configs (
                host_id INTEGER PRIMARY KEY,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                suspended BOOLEAN NOT NULL DEFAULT 0,
                alerts_suppressed BOOLEAN NOT NULL DEFAULT 0,
                collection_interval_seconds INTEGER NOT NULL DEFAULT 30,
                anomaly_detection_interval_seconds INTEGER NOT NULL DEFAULT 15,
                adaptive_collection_enabled BOOLEAN NOT NULL DEFAULT 0,
                cpu_threshold REAL NOT NULL DEFAULT 80.0,
                memory_threshold REAL NOT NULL DEFAULT 90.0,
                disk_threshold REAL NOT NULL DEFAULT 90.0,
                disk_io_threshold REAL,
                network_io_threshold REAL,
                detection_window INTEGER NOT NULL DEFAULT 30,
                threshold_factor REAL NOT NULL DEFAULT 2.0,
                correlation_threshold_factor REAL NOT NULL DEFAULT 2.0,
                retention_days INTEGER NOT NULL DEFAULT 30,
                monitored_disks TEXT NOT NULL DEFAULT '["/"]',
                use_llm_explanation BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                timestamp DATETIME NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_percent REAL NOT NULL,
                swap_percent REAL,
                disk_usage TEXT NOT NULL DEFAULT '{}',
                network_io TEXT NOT NULL DEFAULT '{}',
                disk_io_read REAL,
                disk_io_write REAL,
                net_io_sent REAL,
                net_io_recv REAL,
                load_avg_1m REAL,
                load_avg_5m REAL,
                load_avg_15m REAL,
                network_connections INTEGER,
                system_uptime_seconds REAL,
                top_processes TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_samples_host_timestamp ON samples(host_id, timestamp DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                sample_id INTEGER,
                timestamp DATETIME NOT NULL,
                metric_type TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value REAL NOT NULL,
                severity TEXT NOT NULL,
                anomaly_score REAL NOT NULL DEFAULT 0.0,
                acknowledged BOOLEAN NOT NULL DEFAULT 0,
                resolved BOOLEAN NOT NULL DEFAULT 0,
                resolved_at DATETIME,
                explanation TEXT,
                llm_generated BOOLEAN NOT NULL DEFAULT 0,
                correlation TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_anomalies_host_timestamp ON anomalies(host_id, timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_anomalies_unresolved ON anomalies(host_id, resolved, timestamp DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS alert_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                alert_type TEXT NOT NULL,
                status TEXT NOT NULL,
                value REAL NOT NULL,
                threshold REAL NOT NULL,
                message TEXT NOT NULL,
                recipients TEXT NOT NULL DEFAULT '',
                sent_at DATETIME NOT NULL,
                resolved_at DATETIME
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_alert_history_host ON alert_history(host_id, sent_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_alert_history_status ON alert_history(host_id, status, sent_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS heartbeats (
                host_id INTEGER PRIMARY KEY,
                last_heartbeat DATETIME NOT NULL,
                agent_version TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unknown',
                service_type TEXT NOT NULL DEFAULT 'systemd',
                last_checked DATETIME,
                monitoring_enabled BOOLEAN NOT NULL DEFAULT 0,
                UNIQUE(host_id, name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_services_host ON services(host_id, monitoring_enabled)",
        ];

        for sql in statements {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                error!("Failed to run schema statement: {}", e);
                return Err(e.into());
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
