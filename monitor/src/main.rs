use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use monitor::alerts::{AlertEngine, ConnectionAlerter, Mailer, Notifier, ServiceChecker};
use monitor::cache::Cache;
use monitor::collector::Collector;
use monitor::config::ConfigManager;
use monitor::database::Database;
use monitor::detector::AnomalyDetector;
use monitor::heartbeat::{HeartbeatService, StatusCalculator};
use monitor::scheduler::{JobContext, LoggingMaintenanceHook, MaintenanceHook, Scheduler};
use monitor::ssh::SshExecutor;
use monitor::status::AnomalyStatusService;
use monitor::web::{start_web_server, AppState};

#[derive(Parser)]
#[command(name = "monitor", about = "Agentless infrastructure monitoring server")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", env = "MONITOR_CONFIG_DIR")]
    config_dir: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full server: scheduler plus the read API (default)
    Run,
    /// Run one collection pass over all enabled hosts
    Collect,
    /// Run one anomaly detection pass
    Detect,
    /// Discover running services on every enabled host
    ScanServices,
    /// Run one heartbeat probe pass
    HeartbeatCheck,
    /// Write the app heartbeat once
    AppHeartbeat,
    /// Invoke the aggregation hook
    Aggregate,
    /// Invoke the retention cleanup hook
    Cleanup,
}

struct Services {
    config: Arc<monitor::config::AppConfig>,
    database: Arc<Database>,
    cache: Arc<Cache>,
    ssh: Arc<SshExecutor>,
    heartbeat: Arc<HeartbeatService>,
    status_calculator: Arc<StatusCalculator>,
    status_service: Arc<AnomalyStatusService>,
    scheduler: Arc<Scheduler>,
    hook: Arc<dyn MaintenanceHook>,
}

async fn build_services(config_dir: &str) -> Result<Services> {
    let config_manager = ConfigManager::new(config_dir).await?;
    let config = Arc::new(config_manager.get_current_config());

    let database = Arc::new(Database::new(&config.database_path).await?);
    let cache = Arc::new(Cache::new());

    let ssh = Arc::new(SshExecutor::new(
        config.ssh_private_key_path.clone(),
        config.ssh_public_key_path.clone(),
    ));

    let mailer = config.email.clone().and_then(Mailer::new).map(Arc::new);
    if mailer.is_none() {
        warn!("Email alerting not configured - alerts will be logged only");
    }
    let notifier = Arc::new(Notifier::new(database.clone(), mailer));

    let connection = Arc::new(ConnectionAlerter::new(
        database.clone(),
        cache.clone(),
        notifier.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatService::new(
        database.clone(),
        cache.clone(),
        ssh.clone(),
        connection,
        config.app_heartbeat_file.clone(),
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
        notifier,
    ));

    let status_service = Arc::new(AnomalyStatusService::new(database.clone(), cache.clone()));
    let status_calculator = Arc::new(StatusCalculator::new(
        database.clone(),
        cache.clone(),
        config.app_heartbeat_file.clone(),
    ));

    let ctx = Arc::new(JobContext {
        database: database.clone(),
        cache: cache.clone(),
        collector,
        detector,
        alert_engine,
        service_checker,
        heartbeat: heartbeat.clone(),
        status: status_service.clone(),
    });

    let hook: Arc<dyn MaintenanceHook> = Arc::new(LoggingMaintenanceHook);
    let scheduler = Arc::new(Scheduler::new(ctx, hook.clone()));

    Ok(Services {
        config,
        database,
        cache,
        ssh,
        heartbeat,
        status_calculator,
        status_service,
        scheduler,
        hook,
    })
}

async fn run_server(services: Services) -> Result<()> {
    info!("Starting monitoring server");

    let host_count = services.database.list_hosts().await?.len();
    info!("Fleet loaded: {} hosts", host_count);

    services.scheduler.clone().start().await?;
    info!("Scheduler started");

    let state = AppState::new(
        services.config.clone(),
        services.database.clone(),
        services.cache.clone(),
        services.status_service.clone(),
        services.status_calculator.clone(),
        services.heartbeat.clone(),
        services.ssh.clone(),
    );

    let scheduler = services.scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        scheduler.shutdown().await;
        std::process::exit(0);
    });

    start_web_server(state).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity
    let env_filter = EnvFilter::from_default_env()
        .add_directive("monitor=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let services = build_services(&cli.config_dir).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_server(services).await,
        Command::Collect => {
            services.scheduler.collect_all_once().await;
            Ok(())
        }
        Command::Detect => {
            services.scheduler.detect_all_once().await;
            Ok(())
        }
        Command::ScanServices => {
            let hosts = services.database.enabled_hosts().await?;
            for (host, _config) in hosts {
                match services.heartbeat.discover_services(&host).await {
                    Ok(count) => info!("{}: {} services", host.name, count),
                    Err(e) => error!("Service scan failed for {}: {}", host.name, e),
                }
            }
            Ok(())
        }
        Command::HeartbeatCheck => {
            services.scheduler.heartbeat_check_once().await;
            Ok(())
        }
        Command::AppHeartbeat => {
            services.heartbeat.write_app_heartbeat().await?;
            info!("App heartbeat written");
            Ok(())
        }
        Command::Aggregate => services.hook.aggregate(),
        Command::Cleanup => services.hook.cleanup(),
    }
}
