//! Application-wide constants for cadences, timeouts, and cache TTLs.
//!
//! Central repository for the magic numbers used by the scheduler, the
//! collectors, and the alerting pipeline.

#![allow(dead_code)] // Some constants are defined for future use

/// Scheduler cadences and job timeouts
pub mod scheduler {
    /// Default period between collection ticks (seconds)
    pub const COLLECT_INTERVAL_SECONDS: u64 = 30;

    /// Hard timeout for a single probe execution (seconds)
    pub const COLLECT_TIMEOUT_SECONDS: u64 = 90;

    /// Period between heartbeat SSH probes (seconds)
    pub const HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

    /// Timeout for a heartbeat SSH dial (seconds)
    pub const HEARTBEAT_TIMEOUT_SECONDS: u64 = 5;

    /// Period between service status sweeps (seconds)
    pub const SERVICE_CHECK_INTERVAL_SECONDS: u64 = 30;

    /// Timeout for one service status check (seconds)
    pub const SERVICE_CHECK_TIMEOUT_SECONDS: u64 = 10;

    /// Period between anomaly detection passes (seconds)
    pub const DETECT_INTERVAL_SECONDS: u64 = 60;

    /// Timeout for one detection pass (seconds)
    pub const DETECT_TIMEOUT_SECONDS: u64 = 30;

    /// Period between app heartbeat writes (seconds)
    pub const APP_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

    /// Maximum concurrent jobs across all hosts
    pub const MAX_CONCURRENT_JOBS: usize = 8;

    /// How long shutdown waits for in-flight jobs to drain (seconds)
    pub const SHUTDOWN_DRAIN_SECONDS: u64 = 10;

    /// 6-field cron expression for the hourly aggregation hook
    pub const AGGREGATE_SCHEDULE: &str = "0 0 * * * *";

    /// 6-field cron expression for the daily retention cleanup hook
    pub const CLEANUP_SCHEDULE: &str = "0 30 3 * * *";
}

/// Cache key TTLs (seconds)
pub mod cache_ttl {
    /// Latest sample per host
    pub const LATEST_SAMPLE: i64 = 300;

    /// Previous alert state per host
    pub const ALERT_STATE: i64 = 86400;

    /// Anomaly summary per host
    pub const ANOMALY_SUMMARY: i64 = 300;

    /// Monitoring app heartbeat
    pub const APP_HEARTBEAT: i64 = 300;

    /// Offline flag per host
    pub const CONNECTION_STATE: i64 = 3600;

    /// Quiet window after a suspend or resume action
    pub const SUSPEND_RESUME_EPOCH: i64 = 60;

    /// Consecutive service failure counter
    pub const SERVICE_FAILURE_COUNT: i64 = 300;

    /// One-alert-per-episode flag for services
    pub const SERVICE_ALERT_SENT: i64 = 3600;
}

/// Heartbeat status thresholds
pub mod heartbeat {
    /// Normal staleness threshold for a host heartbeat (seconds)
    pub const BASE_GRACE_SECONDS: i64 = 60;

    /// Staleness threshold while recovering from app downtime (seconds)
    pub const ADAPTIVE_GRACE_SECONDS: i64 = 600;

    /// App heartbeat age beyond which the app counts as having been down
    pub const APP_DOWN_AFTER_SECONDS: i64 = 300;
}

/// Detection pipeline defaults
pub mod detector {
    /// Default number of samples in the detection window
    pub const DEFAULT_WINDOW: usize = 30;

    /// Minimum samples required before any detection runs
    pub const MIN_SAMPLES: usize = 10;

    /// Multiplier applied to operator thresholds for detection-grade flags
    pub const THRESHOLD_FACTOR: f64 = 2.0;

    /// Sensitivity for the persistence and volatility detectors
    pub const ROBUST_C: f64 = 3.0;

    /// Sigma threshold for the level-shift detector
    pub const LEVEL_SHIFT_THRESHOLD: f64 = 3.0;

    /// Correlation frame cap
    pub const CORRELATION_MAX_WINDOW: usize = 120;

    /// Default correlation anomaly threshold
    pub const CORRELATION_THRESHOLD_FACTOR: f64 = 2.0;

    /// Dedupe window for unresolved anomalies of the same metric (minutes)
    pub const DEDUPE_WINDOW_MINUTES: i64 = 10;

    /// Per-interface throughput flag (bytes over one collection interval)
    pub const NETWORK_THROUGHPUT_FLAG_BYTES: u64 = 1_073_741_824;
}

/// Alerting constants
pub mod alerts {
    /// Consecutive failed service checks before a non-failed outage alerts
    pub const SERVICE_FAILURES_BEFORE_ALERT: u32 = 2;

    /// SMTP send timeout (seconds)
    pub const SMTP_TIMEOUT_SECONDS: u64 = 15;
}

/// SSH executor constants
pub mod ssh {
    /// Default connect timeout (seconds)
    pub const CONNECT_TIMEOUT_SECONDS: u64 = 30;

    /// Concurrent sessions allowed per host
    pub const MAX_SESSIONS_PER_HOST: usize = 2;

    /// Per-attempt timeout for dependency install strategies (seconds)
    pub const INSTALL_ATTEMPT_TIMEOUT_SECONDS: u64 = 180;
}

/// Probe constants
pub mod probe {
    /// Remote path the probe script is uploaded to
    pub const REMOTE_PATH: &str = "/tmp/metrics_probe.py";

    /// File mode for the uploaded probe
    pub const REMOTE_MODE: &str = "0755";
}

/// Read API limits
pub mod api {
    /// Downsampling cap for range queries
    pub const MAX_SERIES_POINTS: usize = 500;

    /// CPU or memory percent above which a point is always kept
    pub const SPIKE_KEEP_PERCENT: f64 = 80.0;
}
