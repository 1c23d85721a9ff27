use super::{ExecOutput, SshSession};
use crate::constants::ssh;
use crate::database::Host;
use crate::errors::{MonitorError, ProbeError, SshError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

/// One strategy for installing the probe runtime dependency.
struct InstallStrategy {
    name: &'static str,
    command: &'static str,
}

const INSTALL_STRATEGIES: &[InstallStrategy] = &[
    InstallStrategy {
        name: "pip3 user install",
        command: "pip3 install --user --upgrade-strategy only-if-needed psutil 2>&1",
    },
    InstallStrategy {
        name: "python3 -m pip user install",
        command: "python3 -m pip install --user --upgrade-strategy only-if-needed psutil 2>&1",
    },
    InstallStrategy {
        name: "apt",
        command: "sudo apt-get update -qq && sudo apt-get install -y --no-upgrade python3-psutil 2>&1",
    },
    InstallStrategy {
        name: "yum/dnf",
        command: "sudo yum install -y python3-psutil 2>&1 || sudo dnf install -y python3-psutil 2>&1",
    },
    InstallStrategy {
        name: "pip fallback",
        command: "pip install --user psutil 2>&1",
    },
];

const DEPENDENCY_CHECK: &str = "python3 -c \"import psutil; print(psutil.__version__)\" 2>&1";

/// Key-based remote command execution with per-host session limits.
///
/// Sessions are opened per call and closed afterwards; the per-host
/// semaphore bounds how many run concurrently against one machine.
pub struct SshExecutor {
    private_key_path: String,
    public_key_path: String,
    host_semaphores: Arc<RwLock<HashMap<i64, Arc<Semaphore>>>>,
}

impl SshExecutor {
    pub fn new(private_key_path: String, public_key_path: String) -> Self {
        Self {
            private_key_path,
            public_key_path,
            host_semaphores: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn semaphore_for(&self, host_id: i64) -> Arc<Semaphore> {
        {
            let semaphores = self.host_semaphores.read().await;
            if let Some(sem) = semaphores.get(&host_id) {
                return sem.clone();
            }
        }

        let mut semaphores = self.host_semaphores.write().await;
        semaphores
            .entry(host_id)
            .or_insert_with(|| Arc::new(Semaphore::new(ssh::MAX_SESSIONS_PER_HOST)))
            .clone()
    }

    /// Execute a command on a host with a hard deadline.
    pub async fn execute(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        let semaphore = self.semaphore_for(host.id).await;
        let _permit = semaphore.acquire().await.map_err(|e| SshError::SshFailure {
            host: host.address.clone(),
            reason: format!("semaphore closed: {}", e),
        })?;

        let session = SshSession::connect_with_key(
            &host.address,
            host.ssh_port,
            &host.ssh_user,
            &self.private_key_path,
            Duration::from_secs(ssh::CONNECT_TIMEOUT_SECONDS),
        )
        .await?;

        let result = tokio::time::timeout(timeout, session.execute(command)).await;

        match result {
            Ok(output) => {
                session.disconnect().await;
                output
            }
            Err(_) => {
                // The drop closes the channel; partial output is discarded.
                session.disconnect().await;
                warn!(
                    "Command timed out on {} after {}s",
                    host.address,
                    timeout.as_secs()
                );
                Err(SshError::Timeout {
                    host: host.address.clone(),
                    operation: "executing command".to_string(),
                })
            }
        }
    }

    /// Quick connectivity probe: open a session, run `true`, close.
    pub async fn probe(&self, host: &Host, timeout: Duration) -> Result<(), SshError> {
        let session = tokio::time::timeout(
            timeout,
            SshSession::connect_with_key(
                &host.address,
                host.ssh_port,
                &host.ssh_user,
                &self.private_key_path,
                timeout,
            ),
        )
        .await
        .map_err(|_| SshError::Timeout {
            host: host.address.clone(),
            operation: "heartbeat probe".to_string(),
        })??;

        session.disconnect().await;
        Ok(())
    }

    /// Upload bytes to a remote path through the exec channel.
    pub async fn put_file(
        &self,
        host: &Host,
        remote_path: &str,
        bytes: &[u8],
        mode: &str,
        timeout: Duration,
    ) -> Result<(), SshError> {
        let encoded = BASE64.encode(bytes);
        let command = format!(
            "printf '%s' '{}' | base64 -d > '{}' && chmod {} '{}'",
            encoded, remote_path, mode, remote_path
        );

        let output = self.execute(host, &command, timeout).await?;
        if !output.success() {
            return Err(SshError::SshFailure {
                host: host.address.clone(),
                reason: format!(
                    "upload to {} exited {}: {}",
                    remote_path,
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }

        debug!("Uploaded {} bytes to {}:{}", bytes.len(), host.address, remote_path);
        Ok(())
    }

    /// Deploy the server's public key using a one-shot password.
    ///
    /// Appends the key to authorized_keys only when an exact line match is
    /// absent, then verifies by reconnecting with the private key.
    pub async fn bootstrap_key(&self, host: &Host, password: &str) -> Result<(), SshError> {
        let public_key = fs::read_to_string(&self.public_key_path)
            .await
            .map_err(|_| SshError::KeyMissing {
                path: self.public_key_path.clone(),
            })?;
        let public_key = public_key.trim().to_string();

        let session = SshSession::connect_with_password(
            &host.address,
            host.ssh_port,
            &host.ssh_user,
            password,
            Duration::from_secs(ssh::CONNECT_TIMEOUT_SECONDS),
        )
        .await?;

        let check_cmd = format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh && grep -F \"{}\" ~/.ssh/authorized_keys || echo NOT_FOUND",
            public_key
        );
        let check = session.execute(&check_cmd).await?;

        if check.stdout.trim().ends_with("NOT_FOUND") {
            let add_cmd = format!(
                "echo \"{}\" >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
                public_key
            );
            let added = session.execute(&add_cmd).await?;
            if !added.success() {
                session.disconnect().await;
                return Err(SshError::SshFailure {
                    host: host.address.clone(),
                    reason: format!("failed to append key: {}", added.stderr.trim()),
                });
            }
            info!("Deployed public key to {}", host.address);
        } else {
            debug!("Public key already present on {}", host.address);
        }

        session.disconnect().await;

        // Verify key-based login works before declaring success
        let verify = SshSession::connect_with_key(
            &host.address,
            host.ssh_port,
            &host.ssh_user,
            &self.private_key_path,
            Duration::from_secs(10),
        )
        .await?;
        verify.disconnect().await;

        info!("Key-based login verified for {}", host.address);
        Ok(())
    }

    /// Make sure the probe's metric library is importable, installing it
    /// user-scope if needed. Returns the detected version string.
    pub async fn ensure_probe_dependencies(&self, host: &Host) -> Result<String, MonitorError> {
        let check = self
            .execute(host, DEPENDENCY_CHECK, Duration::from_secs(15))
            .await?;

        if check.success() && !check.stdout.contains("ModuleNotFoundError") {
            let version = check.stdout.trim().to_string();
            debug!("psutil {} present on {}", version, host.address);
            return Ok(version);
        }

        info!("psutil missing on {}, attempting installation", host.address);

        for strategy in INSTALL_STRATEGIES {
            debug!("Trying install strategy '{}' on {}", strategy.name, host.address);

            let attempt = self
                .execute(
                    host,
                    strategy.command,
                    Duration::from_secs(ssh::INSTALL_ATTEMPT_TIMEOUT_SECONDS),
                )
                .await;

            match attempt {
                Ok(_) => {
                    let verify = self
                        .execute(host, DEPENDENCY_CHECK, Duration::from_secs(15))
                        .await?;
                    if verify.success() && !verify.stdout.contains("ModuleNotFoundError") {
                        let version = verify.stdout.trim().to_string();
                        info!(
                            "Installed psutil {} on {} via {}",
                            version, host.address, strategy.name
                        );
                        return Ok(version);
                    }
                }
                Err(e) => {
                    warn!(
                        "Install strategy '{}' failed on {}: {}",
                        strategy.name, host.address, e
                    );
                }
            }
        }

        Err(ProbeError::DependencyMissing {
            host: host.address.clone(),
            detail: "all psutil installation strategies failed".to_string(),
        }
        .into())
    }
}
