//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use monitor::alerts::{AlertEngine, ConnectionAlerter, Notifier, ServiceChecker};
use monitor::cache::Cache;
use monitor::collector::Collector;
use monitor::database::samples::NewSample;
use monitor::database::{Database, Host, NewHost, Sample};
use monitor::detector::AnomalyDetector;
use monitor::heartbeat::{HeartbeatService, StatusCalculator};
use monitor::scheduler::{JobContext, LoggingMaintenanceHook, Scheduler};
use monitor::ssh::SshExecutor;
use monitor::status::AnomalyStatusService;
use std::collections::HashMap;
use std::sync::Arc;

pub mod fixtures {
    pub mod hosts {
        pub const WEB_1: &str = "web-1";
        pub const WEB_2: &str = "web-2";
        pub const DB_1: &str = "db-1";
    }
}

/// Fully wired stack over an in-memory store. No mailer, so emails are
/// logged and dropped; no SSH connections are opened unless a job reaches
/// a live host.
pub struct TestStack {
    pub database: Arc<Database>,
    pub cache: Arc<Cache>,
    pub notifier: Arc<Notifier>,
    pub alert_engine: Arc<AlertEngine>,
    pub detector: Arc<AnomalyDetector>,
    pub status_service: Arc<AnomalyStatusService>,
    pub status_calculator: Arc<StatusCalculator>,
    pub heartbeat: Arc<HeartbeatService>,
    pub connection: Arc<ConnectionAlerter>,
    pub scheduler: Arc<Scheduler>,
    pub app_heartbeat_file: std::path::PathBuf,
    _tempdir: tempfile::TempDir,
}

pub async fn build_stack() -> TestStack {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let app_heartbeat_file = tempdir.path().join("app_heartbeat.txt");

    let database = Arc::new(Database::in_memory().await.expect("database"));
    let cache = Arc::new(Cache::new());
    let ssh = Arc::new(SshExecutor::new(
        tempdir.path().join("id_rsa").display().to_string(),
        tempdir.path().join("id_rsa.pub").display().to_string(),
    ));

    let notifier = Arc::new(Notifier::new(database.clone(), None));
    let connection = Arc::new(ConnectionAlerter::new(
        database.clone(),
        cache.clone(),
        notifier.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatService::new(
        database.clone(),
        cache.clone(),
        ssh.clone(),
        connection.clone(),
        app_heartbeat_file.display().to_string(),
    ));

    let collector = Arc::new(Collector::new(
        database.clone(),
        cache.clone(),
        ssh.clone(),
    ));
    let detector = Arc::new(AnomalyDetector::new(database.clone()));
    let alert_engine = Arc::new(AlertEngine::new(
        database.clone(),
        cache.clone(),
        notifier.clone(),
    ));
    let service_checker = Arc::new(ServiceChecker::new(
        database.clone(),
        cache.clone(),
        ssh.clone(),
        notifier.clone(),
    ));

    let status_service = Arc::new(AnomalyStatusService::new(database.clone(), cache.clone()));
    let status_calculator = Arc::new(StatusCalculator::new(
        database.clone(),
        cache.clone(),
        app_heartbeat_file.display().to_string(),
    ));

    let ctx = Arc::new(JobContext {
        database: database.clone(),
        cache: cache.clone(),
        collector,
        detector: detector.clone(),
        alert_engine: alert_engine.clone(),
        service_checker,
        heartbeat: heartbeat.clone(),
        status: status_service.clone(),
    });

    let scheduler = Arc::new(Scheduler::new(ctx, Arc::new(LoggingMaintenanceHook)));

    TestStack {
        database,
        cache,
        notifier,
        alert_engine,
        detector,
        status_service,
        status_calculator,
        heartbeat,
        connection,
        scheduler,
        app_heartbeat_file,
        _tempdir: tempdir,
    }
}

pub async fn create_host(database: &Database, name: &str) -> Host {
    database
        .create_host(&NewHost {
            name: name.to_string(),
            address: format!("10.0.0.{}", name.len()),
            ssh_port: 22,
            ssh_user: "deploy".to_string(),
        })
        .await
        .expect("create host")
}

/// A plain sample with the given CPU and memory percentages.
pub fn new_sample(cpu: f64, memory: f64) -> NewSample {
    NewSample {
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

/// Sample with one mountpoint at the given usage percent.
pub fn sample_with_disk(cpu: f64, memory: f64, mount: &str, percent: f64) -> NewSample {
    let mut sample = new_sample(cpu, memory);
    sample.disk_usage.insert(
        mount.to_string(),
        monitor::database::DiskUsage {
            total: 100_000_000_000,
            used: (percent * 1_000_000_000.0) as u64,
            free: ((100.0 - percent) * 1_000_000_000.0) as u64,
            percent,
            device: "/dev/sda1".to_string(),
            fstype: "ext4".to_string(),
            disk_type: "SSD".to_string(),
            raid: "none".to_string(),
            physical_disk: "sda".to_string(),
        },
    );
    sample
}

/// Insert a series of CPU samples spaced `step_seconds` apart, ending now.
pub async fn backfill_cpu_series(
    database: &Database,
    host: &Host,
    values: &[(f64, f64)],
    step_seconds: i64,
) -> Vec<Sample> {
    let now = Utc::now();
    let mut inserted = Vec::new();

    for (i, (cpu, memory)) in values.iter().enumerate() {
        let offset = (values.len() - 1 - i) as i64 * step_seconds;
        let ts: DateTime<Utc> = now - Duration::seconds(offset);
        let sample = database
            .insert_sample_at(host.id, &new_sample(*cpu, *memory), ts)
            .await
            .expect("insert sample");
        inserted.push(sample);
    }

    inserted
}
