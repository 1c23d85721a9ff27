use super::AppConfig;
use crate::errors::ConfigError;
use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub struct ConfigManager {
    config: AppConfig,
}

impl ConfigManager {
    /// Load configuration from `<config_dir>/main.toml`. A missing file is
    /// not an error: built-in defaults apply so a fresh checkout can start.
    pub async fn new(config_dir: &str) -> Result<Self> {
        let main_config_path = Path::new(config_dir).join("main.toml");

        let config = if main_config_path.exists() {
            let content = fs::read_to_string(&main_config_path).await.map_err(|e| {
                anyhow!(ConfigError::LoadFailed {
                    path: main_config_path.display().to_string(),
                    reason: e.to_string(),
                })
            })?;

            let config: AppConfig = toml::from_str(&content).map_err(|e| {
                anyhow!(ConfigError::LoadFailed {
                    path: main_config_path.display().to_string(),
                    reason: e.to_string(),
                })
            })?;

            info!("Configuration loaded from {}", main_config_path.display());
            config
        } else {
            warn!(
                "No config file at {}, using built-in defaults",
                main_config_path.display()
            );
            AppConfig::default()
        };

        Self::validate(&config)?;

        Ok(Self { config })
    }

    pub fn get_current_config(&self) -> AppConfig {
        self.config.clone()
    }

    fn validate(config: &AppConfig) -> Result<()> {
        if config.port == 0 {
            return Err(anyhow!(ConfigError::InvalidValue {
                field: "port".to_string(),
                reason: "must be nonzero".to_string(),
            }));
        }

        if let Some(email) = &config.email {
            if email.enabled {
                if email.smtp_host.trim().is_empty() {
                    return Err(anyhow!(ConfigError::MissingRequired {
                        field: "email.smtp_host".to_string(),
                    }));
                }
                if email.from_email.trim().is_empty() {
                    return Err(anyhow!(ConfigError::MissingRequired {
                        field: "email.from_email".to_string(),
                    }));
                }
                if email.use_tls && email.use_ssl {
                    return Err(anyhow!(ConfigError::InvalidValue {
                        field: "email".to_string(),
                        reason: "use_tls and use_ssl are mutually exclusive".to_string(),
                    }));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailSettings;

    #[test]
    fn test_validate_rejects_tls_and_ssl_together() {
        let config = AppConfig {
            email: Some(EmailSettings {
                enabled: true,
                smtp_host: "smtp.example.com".to_string(),
                smtp_port: 587,
                use_tls: true,
                use_ssl: true,
                username: String::new(),
                password: String::new(),
                from_email: "monitor@example.com".to_string(),
                to_email: "ops@example.com".to_string(),
            }),
            ..AppConfig::default()
        };

        assert!(ConfigManager::validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_missing_config_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_str().unwrap()).await.unwrap();
        assert_eq!(manager.get_current_config().port, 8095);
    }
}
