//! Heartbeat agent.
//!
//! Optional push path for hosts that cannot be probed over SSH: POSTs a
//! heartbeat to the monitoring server on a fixed interval and gives up
//! after ten consecutive failed beats so a dead server does not keep a
//! zombie agent alive.
//!
//! Configuration comes from flags or environment variables, with a JSON
//! config file fallback for hosts provisioned by hand.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const MAX_RETRIES_PER_BEAT: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 5;
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_INTERVAL_SECONDS: u64 = 30;

#[derive(Parser)]
#[command(name = "agent", about = "Heartbeat agent for the monitoring server")]
struct Cli {
    /// Host id assigned by the monitoring server
    #[arg(long, env = "MONITOR_SERVER_ID")]
    server_id: Option<i64>,

    /// Base URL of the monitoring server, e.g. http://monitor.internal:8095
    #[arg(long, env = "MONITOR_API_URL")]
    api_url: Option<String>,

    /// Seconds between beats
    #[arg(long, env = "MONITOR_INTERVAL")]
    interval: Option<u64>,

    /// JSON config file consulted when flags and env are absent
    #[arg(long, env = "MONITOR_AGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_id: Option<i64>,
    api_url: Option<String>,
    interval: Option<u64>,
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".monitor_agent.conf"))
}

fn load_file_config(path: Option<&PathBuf>) -> FileConfig {
    let path = match path.cloned().or_else(default_config_path) {
        Some(path) if path.exists() => path,
        _ => return FileConfig::default(),
    };

    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring unreadable config file {}: {}", path.display(), e);
                FileConfig::default()
            }
        },
        Err(e) => {
            warn!("Could not read config file {}: {}", path.display(), e);
            FileConfig::default()
        }
    }
}

async fn send_heartbeat(client: &reqwest::Client, url: &str) -> Result<()> {
    let payload = json!({ "agent_version": env!("CARGO_PKG_VERSION") });

    let mut last_error = None;
    for attempt in 1..=MAX_RETRIES_PER_BEAT {
        match client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                last_error = Some(anyhow!("server returned {}", response.status()));
            }
            Err(e) => {
                last_error = Some(e.into());
            }
        }

        if attempt < MAX_RETRIES_PER_BEAT {
            tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("heartbeat failed")))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("agent=info".parse()?);
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let file_config = load_file_config(cli.config.as_ref());

    let server_id = cli
        .server_id
        .or(file_config.server_id)
        .ok_or_else(|| anyhow!("server id missing: pass --server-id or set MONITOR_SERVER_ID"))?;
    let api_url = cli
        .api_url
        .or(file_config.api_url)
        .ok_or_else(|| anyhow!("api url missing: pass --api-url or set MONITOR_API_URL"))?;
    let interval = cli
        .interval
        .or(file_config.interval)
        .unwrap_or(DEFAULT_INTERVAL_SECONDS)
        .max(1);

    let url = format!("{}/api/heartbeat/{}", api_url.trim_end_matches('/'), server_id);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
        .build()?;

    info!(
        "Heartbeat agent started for host {} ({}s interval)",
        server_id, interval
    );

    let mut consecutive_failures = 0u32;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));

    loop {
        ticker.tick().await;

        match send_heartbeat(&client, &url).await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    info!(
                        "Heartbeat restored after {} failed beats",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "Heartbeat failed ({}/{}): {}",
                    consecutive_failures, MAX_CONSECUTIVE_FAILURES, e
                );

                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    error!(
                        "Giving up after {} consecutive failures",
                        MAX_CONSECUTIVE_FAILURES
                    );
                    return Err(anyhow!(
                        "monitoring server unreachable for {} consecutive beats",
                        MAX_CONSECUTIVE_FAILURES
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.conf");
        std::fs::write(
            &path,
            r#"{"server_id": 7, "api_url": "http://monitor:8095", "interval": 15}"#,
        )
        .unwrap();

        let config = load_file_config(Some(&path));
        assert_eq!(config.server_id, Some(7));
        assert_eq!(config.api_url.as_deref(), Some("http://monitor:8095"));
        assert_eq!(config.interval, Some(15));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let missing = PathBuf::from("/nonexistent/agent.conf");
        let config = load_file_config(Some(&missing));
        assert!(config.server_id.is_none());
        assert!(config.api_url.is_none());
    }
}
