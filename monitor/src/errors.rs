//! Custom error types for the monitoring control plane
//!
//! Provides structured error kinds for the SSH, probe, store, SMTP, and HTTP
//! layers so callers can branch on the failure class instead of strings.

use std::fmt;

/// Main error type for the monitor
#[derive(Debug)]
pub enum MonitorError {
    /// SSH and network errors
    Ssh(SshError),

    /// Remote probe errors
    Probe(ProbeError),

    /// Store operation errors
    Store(StoreError),

    /// Configuration errors
    Config(ConfigError),

    /// SMTP delivery errors
    Smtp(SmtpError),

    /// Other errors with context
    Other(String),
}

/// SSH error variants
#[derive(Debug)]
pub enum SshError {
    /// Authentication was rejected
    AuthFailed { host: String },

    /// Protocol or channel failure
    SshFailure { host: String, reason: String },

    /// Operation exceeded its deadline
    Timeout { host: String, operation: String },

    /// Could not reach the host at all
    Unreachable { host: String, reason: String },

    /// Server key pair is missing on disk
    KeyMissing { path: String },
}

/// Probe error variants
#[derive(Debug)]
pub enum ProbeError {
    /// Probe exited nonzero or produced no output
    RemoteExecFailed {
        host: String,
        exit_code: u32,
        stderr: String,
    },

    /// Probe output was not valid metric JSON
    ParseFailed { host: String, reason: String },

    /// Probe runtime dependency could not be installed
    DependencyMissing { host: String, detail: String },

    /// Collection skipped by configuration or interval gate
    Skipped { host: String, reason: String },
}

/// Store error variants
#[derive(Debug)]
pub enum StoreError {
    /// Connection failed
    ConnectionFailed { reason: String },

    /// Query execution failed after a retry
    QueryFailed { query: String, reason: String },

    /// Row not found
    NotFound { entity: String, id: i64 },
}

/// Configuration error variants
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to load configuration file
    LoadFailed { path: String, reason: String },

    /// Invalid configuration value
    InvalidValue { field: String, reason: String },

    /// Missing required configuration
    MissingRequired { field: String },
}

/// SMTP error variants
#[derive(Debug)]
pub enum SmtpError {
    /// Server rejected the credentials
    AuthFailed { host: String },

    /// TLS negotiation failed
    TlsFailed { host: String, reason: String },

    /// Could not connect to the SMTP server
    ConnectFailed { host: String, reason: String },

    /// Message was rejected or the send aborted
    SendFailed { reason: String },
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Ssh(e) => write!(f, "SSH error: {}", e),
            MonitorError::Probe(e) => write!(f, "Probe error: {}", e),
            MonitorError::Store(e) => write!(f, "Store error: {}", e),
            MonitorError::Config(e) => write!(f, "Configuration error: {}", e),
            MonitorError::Smtp(e) => write!(f, "SMTP error: {}", e),
            MonitorError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for SshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshError::AuthFailed { host } => {
                write!(f, "Authentication failed for {}", host)
            }
            SshError::SshFailure { host, reason } => {
                write!(f, "SSH failure on {}: {}", host, reason)
            }
            SshError::Timeout { host, operation } => {
                write!(f, "Timeout while {} on {}", operation, host)
            }
            SshError::Unreachable { host, reason } => {
                write!(f, "Host {} unreachable: {}", host, reason)
            }
            SshError::KeyMissing { path } => {
                write!(f, "SSH key not found at {}", path)
            }
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::RemoteExecFailed {
                host,
                exit_code,
                stderr,
            } => {
                write!(
                    f,
                    "Probe failed on {} with exit code {}: {}",
                    host, exit_code, stderr
                )
            }
            ProbeError::ParseFailed { host, reason } => {
                write!(f, "Probe output from {} unparseable: {}", host, reason)
            }
            ProbeError::DependencyMissing { host, detail } => {
                write!(f, "Probe dependency missing on {}: {}", host, detail)
            }
            ProbeError::Skipped { host, reason } => {
                write!(f, "Collection skipped for {}: {}", host, reason)
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed { reason } => {
                write!(f, "Store connection failed: {}", reason)
            }
            StoreError::QueryFailed { query, reason } => {
                write!(f, "Query '{}' failed: {}", query, reason)
            }
            StoreError::NotFound { entity, id } => {
                write!(f, "{} {} not found", entity, id)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path, reason)
            }
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpError::AuthFailed { host } => {
                write!(f, "SMTP authentication failed for {}", host)
            }
            SmtpError::TlsFailed { host, reason } => {
                write!(f, "TLS negotiation with {} failed: {}", host, reason)
            }
            SmtpError::ConnectFailed { host, reason } => {
                write!(f, "Connection to SMTP server {} failed: {}", host, reason)
            }
            SmtpError::SendFailed { reason } => {
                write!(f, "Failed to send mail: {}", reason)
            }
        }
    }
}

impl std::error::Error for MonitorError {}
impl std::error::Error for SshError {}
impl std::error::Error for ProbeError {}
impl std::error::Error for StoreError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for SmtpError {}

impl From<SshError> for MonitorError {
    fn from(err: SshError) -> Self {
        MonitorError::Ssh(err)
    }
}

impl From<ProbeError> for MonitorError {
    fn from(err: ProbeError) -> Self {
        MonitorError::Probe(err)
    }
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        MonitorError::Store(err)
    }
}

impl From<ConfigError> for MonitorError {
    fn from(err: ConfigError) -> Self {
        MonitorError::Config(err)
    }
}

impl From<SmtpError> for MonitorError {
    fn from(err: SmtpError) -> Self {
        MonitorError::Smtp(err)
    }
}

impl From<anyhow::Error> for MonitorError {
    fn from(err: anyhow::Error) -> Self {
        MonitorError::Other(err.to_string())
    }
}
