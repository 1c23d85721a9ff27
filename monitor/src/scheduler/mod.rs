//! Tick-driven job dispatcher.
//!
//! Every job class runs on its own fixed-period clock and fans out across
//! hosts through a bounded worker pool. Collection and alert evaluation for
//! one host share a single-slot lock: a tick that finds the slot busy is
//! dropped, never queued, so overruns cannot amplify latency. Shutdown is
//! cooperative with a bounded drain.

use crate::alerts::{AlertEngine, ServiceChecker};
use crate::collector::Collector;
use crate::constants::scheduler as consts;
use crate::database::Database;
use crate::detector::AnomalyDetector;
use crate::errors::{MonitorError, ProbeError};
use crate::heartbeat::HeartbeatService;
use crate::status::AnomalyStatusService;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Seam for the out-of-scope aggregation and retention collaborators.
pub trait MaintenanceHook: Send + Sync {
    fn aggregate(&self) -> Result<()>;
    fn cleanup(&self) -> Result<()>;
}

/// Default hook: logs the invocation and does nothing else.
pub struct LoggingMaintenanceHook;

impl MaintenanceHook for LoggingMaintenanceHook {
    fn aggregate(&self) -> Result<()> {
        info!("Aggregation hook invoked (no collaborator registered)");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        info!("Retention cleanup hook invoked (no collaborator registered)");
        Ok(())
    }
}

/// Everything a job needs, injected once at startup.
pub struct JobContext {
    pub database: Arc<Database>,
    pub cache: Arc<crate::cache::Cache>,
    pub collector: Arc<Collector>,
    pub detector: Arc<AnomalyDetector>,
    pub alert_engine: Arc<AlertEngine>,
    pub service_checker: Arc<ServiceChecker>,
    pub heartbeat: Arc<HeartbeatService>,
    pub status: Arc<AnomalyStatusService>,
}

pub struct Scheduler {
    ctx: Arc<JobContext>,
    hook: Arc<dyn MaintenanceHook>,
    host_locks: Arc<RwLock<HashMap<i64, Arc<Mutex<()>>>>>,
    job_semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cron: Mutex<Option<JobScheduler>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<JobContext>, hook: Arc<dyn MaintenanceHook>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            ctx,
            hook,
            host_locks: Arc::new(RwLock::new(HashMap::new())),
            job_semaphore: Arc::new(Semaphore::new(consts::MAX_CONCURRENT_JOBS)),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
            cron: Mutex::new(None),
        }
    }

    async fn host_lock(&self, host_id: i64) -> Arc<Mutex<()>> {
        {
            let locks = self.host_locks.read().await;
            if let Some(lock) = locks.get(&host_id) {
                return lock.clone();
            }
        }
        let mut locks = self.host_locks.write().await;
        locks
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Spawn all periodic loops plus the cron-driven maintenance hooks.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        info!(
            "Starting scheduler (collect {}s, heartbeat {}s, services {}s, detect {}s)",
            consts::COLLECT_INTERVAL_SECONDS,
            consts::HEARTBEAT_INTERVAL_SECONDS,
            consts::SERVICE_CHECK_INTERVAL_SECONDS,
            consts::DETECT_INTERVAL_SECONDS
        );

        let mut handles = self.handles.lock().await;

        handles.push(self.spawn_loop(consts::COLLECT_INTERVAL_SECONDS, "collect-metrics", {
            let scheduler = self.clone();
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.collect_all_once().await }
            }
        }));

        handles.push(self.spawn_loop(consts::HEARTBEAT_INTERVAL_SECONDS, "heartbeat-probe", {
            let scheduler = self.clone();
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.heartbeat_check_once().await }
            }
        }));

        handles.push(self.spawn_loop(consts::SERVICE_CHECK_INTERVAL_SECONDS, "service-check", {
            let scheduler = self.clone();
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.service_check_once().await }
            }
        }));

        handles.push(self.spawn_loop(consts::DETECT_INTERVAL_SECONDS, "detect-anomalies", {
            let scheduler = self.clone();
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.detect_all_once().await }
            }
        }));

        handles.push(self.spawn_loop(consts::APP_HEARTBEAT_INTERVAL_SECONDS, "app-heartbeat", {
            let scheduler = self.clone();
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.app_heartbeat_once().await }
            }
        }));

        drop(handles);

        self.start_cron_hooks().await?;

        Ok(())
    }

    fn spawn_loop<F, Fut>(&self, period_seconds: u64, name: &'static str, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(period_seconds));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        job().await;
                    }
                    _ = shutdown.changed() => {
                        debug!("Loop '{}' observed shutdown", name);
                        break;
                    }
                }
            }
        })
    }

    async fn start_cron_hooks(&self) -> Result<()> {
        let cron = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        let hook = self.hook.clone();
        let aggregate_job = Job::new_async(consts::AGGREGATE_SCHEDULE, move |_uuid, _lock| {
            let hook = hook.clone();
            Box::pin(async move {
                if let Err(e) = hook.aggregate() {
                    error!("Scheduled aggregation failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create aggregation job: {}", e))?;
        cron.add(aggregate_job)
            .await
            .map_err(|e| anyhow!("Failed to schedule aggregation job: {}", e))?;

        let hook = self.hook.clone();
        let cleanup_job = Job::new_async(consts::CLEANUP_SCHEDULE, move |_uuid, _lock| {
            let hook = hook.clone();
            Box::pin(async move {
                if let Err(e) = hook.cleanup() {
                    error!("Scheduled cleanup failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create cleanup job: {}", e))?;
        cron.add(cleanup_job)
            .await
            .map_err(|e| anyhow!("Failed to schedule cleanup job: {}", e))?;

        cron.start()
            .await
            .map_err(|e| anyhow!("Failed to start cron scheduler: {}", e))?;

        // Keep the handle alive for the life of the scheduler
        *self.cron.lock().await = Some(cron);

        info!("Maintenance hooks scheduled (aggregate hourly, cleanup daily)");
        Ok(())
    }

    /// One collection pass across all enabled hosts.
    pub async fn collect_all_once(&self) {
        let run_id = Uuid::new_v4();
        let hosts = match self.ctx.database.enabled_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Collection pass {} could not list hosts: {}", run_id, e);
                return;
            }
        };

        debug!("Collection pass {} over {} hosts", run_id, hosts.len());

        let mut tasks = Vec::new();
        for (host, _config) in hosts {
            let ctx = self.ctx.clone();
            let lock = self.host_lock(host.id).await;
            let semaphore = self.job_semaphore.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };

                // At most one in-flight collection per host; a busy slot
                // means the previous run overran and this tick is dropped.
                let Ok(_guard) = lock.try_lock() else {
                    debug!("Collection still running for {}, skipping tick", host.name);
                    return;
                };

                match ctx.collector.collect_once(&host).await {
                    Ok(sample) => {
                        if let Err(e) = ctx.alert_engine.evaluate_and_send(&host, &sample).await {
                            error!("Alert evaluation failed for {}: {}", host.name, e);
                        }
                    }
                    Err(MonitorError::Probe(ProbeError::Skipped { reason, .. })) => {
                        debug!("Skipping {}: {}", host.name, reason);
                    }
                    Err(e) => {
                        warn!("Collection failed for {}: {}", host.name, e);
                    }
                }
            }));
        }

        futures::future::join_all(tasks).await;
    }

    /// One detection pass across all enabled hosts.
    pub async fn detect_all_once(&self) {
        let hosts = match self.ctx.database.enabled_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Detection pass could not list hosts: {}", e);
                return;
            }
        };

        for (host, config) in hosts {
            if config.suspended {
                debug!("Skipping detection for {} - monitoring suspended", host.name);
                continue;
            }

            let ctx = self.ctx.clone();
            let result = tokio::time::timeout(
                Duration::from_secs(consts::DETECT_TIMEOUT_SECONDS),
                async {
                    let Some(sample) = ctx.database.latest_sample(host.id).await? else {
                        return Ok::<_, anyhow::Error>(Vec::new());
                    };
                    ctx.detector.detect(&host, &config, &sample).await
                },
            )
            .await;

            match result {
                Ok(Ok(anomalies)) if !anomalies.is_empty() => {
                    self.ctx.status.invalidate(host.id).await;
                    if let Err(e) = self.ctx.alert_engine.notify_anomalies(&host, &anomalies).await
                    {
                        error!("Anomaly notification failed for {}: {}", host.name, e);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Detection failed for {}: {}", host.name, e),
                Err(_) => warn!(
                    "Detection timed out for {} after {}s",
                    host.name,
                    consts::DETECT_TIMEOUT_SECONDS
                ),
            }
        }
    }

    /// One heartbeat probe pass across all hosts.
    pub async fn heartbeat_check_once(&self) {
        let hosts = match self.ctx.database.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Heartbeat pass could not list hosts: {}", e);
                return;
            }
        };

        let mut tasks = Vec::new();
        for host in hosts {
            let ctx = self.ctx.clone();
            let semaphore = self.job_semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Err(e) = ctx.heartbeat.probe_host(&host).await {
                    warn!("Heartbeat probe errored for {}: {}", host.name, e);
                }
            }));
        }

        futures::future::join_all(tasks).await;
    }

    /// One service-check pass across all enabled hosts.
    pub async fn service_check_once(&self) {
        let hosts = match self.ctx.database.enabled_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Service pass could not list hosts: {}", e);
                return;
            }
        };

        let mut tasks = Vec::new();
        for (host, _config) in hosts {
            let ctx = self.ctx.clone();
            let semaphore = self.job_semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Err(e) = ctx.service_checker.check_host_services(&host).await {
                    warn!("Service checks failed for {}: {}", host.name, e);
                }
            }));
        }

        futures::future::join_all(tasks).await;
    }

    /// Refresh the app heartbeat and sweep expired cache entries.
    pub async fn app_heartbeat_once(&self) {
        if let Err(e) = self.ctx.heartbeat.write_app_heartbeat().await {
            warn!("App heartbeat write failed: {}", e);
        }
        self.ctx.cache.sweep().await;
    }

    /// Flip the shutdown signal and wait for loops to drain.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down, draining workers...");
        let _ = self.shutdown_tx.send(true);

        let mut handles = self.handles.lock().await;
        let drain = futures::future::join_all(handles.drain(..));

        if tokio::time::timeout(Duration::from_secs(consts::SHUTDOWN_DRAIN_SECONDS), drain)
            .await
            .is_err()
        {
            warn!(
                "Scheduler drain exceeded {}s, abandoning remaining workers",
                consts::SHUTDOWN_DRAIN_SECONDS
            );
        } else {
            info!("Scheduler stopped");
        }
    }
}
