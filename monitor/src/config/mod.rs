pub mod manager;

use serde::{Deserialize, Serialize};

pub use manager::ConfigManager;

/// Deployment-level configuration loaded from config/main.toml.
///
/// Host inventory and per-host monitoring settings live in the store and are
/// managed through the API; this file only carries process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_private_key_path")]
    pub ssh_private_key_path: String,
    #[serde(default = "default_public_key_path")]
    pub ssh_public_key_path: String,

    #[serde(default = "default_app_heartbeat_file")]
    pub app_heartbeat_file: String,

    pub email: Option<EmailSettings>,
}

/// SMTP delivery settings.
///
/// Port selects the connection discipline: 465 implicit TLS, 587 STARTTLS,
/// 25 plain with authentication only when credentials are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_email: String,
    /// Comma-separated recipient list
    pub to_email: String,
}

impl EmailSettings {
    pub fn recipients(&self) -> Vec<String> {
        self.to_email
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8095
}

fn default_database_path() -> String {
    "data/monitor.db".to_string()
}

fn default_private_key_path() -> String {
    "ssh_keys/id_rsa".to_string()
}

fn default_public_key_path() -> String {
    "ssh_keys/id_rsa.pub".to_string()
}

fn default_app_heartbeat_file() -> String {
    "/tmp/monitoring_app_heartbeat.txt".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            ssh_private_key_path: default_private_key_path(),
            ssh_public_key_path: default_public_key_path(),
            app_heartbeat_file: default_app_heartbeat_file(),
            email: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_split_and_trim() {
        let email = EmailSettings {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            use_tls: true,
            use_ssl: false,
            username: String::new(),
            password: String::new(),
            from_email: "monitor@example.com".to_string(),
            to_email: "ops@example.com, oncall@example.com ,".to_string(),
        };

        assert_eq!(
            email.recipients(),
            vec!["ops@example.com".to_string(), "oncall@example.com".to_string()]
        );
    }

    #[test]
    fn test_defaults_applied_on_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 8095);
        assert_eq!(config.database_path, "data/monitor.db");
        assert!(config.email.is_none());
    }
}
