pub mod executor;

pub use executor::SshExecutor;

use crate::errors::SshError;
use anyhow::Result;
use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct SshSession {
    client: Client,
    host: String,
}

impl SshSession {
    /// Open a key-authenticated session.
    pub async fn connect_with_key(
        address: &str,
        port: u16,
        username: &str,
        key_path: &str,
        connect_timeout: Duration,
    ) -> Result<Self, SshError> {
        let key_content = fs::read_to_string(key_path).await.map_err(|_| {
            SshError::KeyMissing {
                path: key_path.to_string(),
            }
        })?;

        if key_path.ends_with(".pub") {
            return Err(SshError::KeyMissing {
                path: format!("{} is a public key, private key required", key_path),
            });
        }

        let auth_method = AuthMethod::with_key(&key_content, None);
        Self::connect(address, port, username, auth_method, connect_timeout).await
    }

    /// Open a password-authenticated session (key bootstrap only).
    pub async fn connect_with_password(
        address: &str,
        port: u16,
        username: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self, SshError> {
        let auth_method = AuthMethod::with_password(password);
        Self::connect(address, port, username, auth_method, connect_timeout).await
    }

    async fn connect(
        address: &str,
        port: u16,
        username: &str,
        auth_method: AuthMethod,
        connect_timeout: Duration,
    ) -> Result<Self, SshError> {
        debug!("Establishing SSH connection to {}@{}:{}", username, address, port);

        let connect = Client::connect(
            (address, port),
            username,
            auth_method,
            ServerCheckMethod::NoCheck,
        );

        let client = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| SshError::Timeout {
                host: address.to_string(),
                operation: "connecting".to_string(),
            })?
            .map_err(|e| classify_connect_error(address, e))?;

        debug!("SSH connection established to {}@{}", username, address);

        Ok(Self {
            client,
            host: address.to_string(),
        })
    }

    /// Run a command and return its full output. A nonzero exit is not an
    /// error at this layer; callers inspect the exit code.
    pub async fn execute(&self, command: &str) -> Result<ExecOutput, SshError> {
        debug!("Executing on {}: {}", self.host, command);

        let result = self.client.execute(command).await.map_err(|e| {
            SshError::SshFailure {
                host: self.host.clone(),
                reason: e.to_string(),
            }
        })?;

        if result.exit_status != 0 {
            debug!(
                "Command on {} exited {} with stderr: {}",
                self.host,
                result.exit_status,
                result.stderr.trim()
            );
        }

        Ok(ExecOutput {
            exit_code: result.exit_status,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Error closing SSH session to {}: {}", self.host, e);
        }
    }
}

fn classify_connect_error(host: &str, err: async_ssh2_tokio::Error) -> SshError {
    let text = err.to_string();
    let lowered = text.to_lowercase();

    if lowered.contains("auth") || lowered.contains("password") || lowered.contains("key") {
        SshError::AuthFailed {
            host: host.to_string(),
        }
    } else if lowered.contains("refused")
        || lowered.contains("unreachable")
        || lowered.contains("resolve")
        || lowered.contains("no route")
        || lowered.contains("timed out")
    {
        SshError::Unreachable {
            host: host.to_string(),
            reason: text,
        }
    } else {
        SshError::SshFailure {
            host: host.to_string(),
            reason: text,
        }
    }
}
