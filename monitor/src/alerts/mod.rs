pub mod connection;
pub mod engine;
pub mod mailer;
pub mod service;

pub use connection::ConnectionAlerter;
pub use engine::AlertEngine;
pub use mailer::Mailer;
pub use service::ServiceChecker;

use crate::database::{AlertRecord, Database, NewAlertRecord};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

/// Shared notification sink: best-effort email plus the durable alert
/// history. Email failures are logged and never abort the caller.
pub struct Notifier {
    database: Arc<Database>,
    mailer: Option<Arc<Mailer>>,
}

impl Notifier {
    pub fn new(database: Arc<Database>, mailer: Option<Arc<Mailer>>) -> Self {
        Self { database, mailer }
    }

    pub fn recipients_string(&self) -> String {
        self.mailer
            .as_ref()
            .map(|m| m.recipients_string())
            .unwrap_or_default()
    }

    /// Fire-and-log email delivery.
    pub async fn email(&self, subject: &str, body: &str) {
        let Some(mailer) = &self.mailer else {
            info!("No mailer configured, skipping email: {}", subject);
            return;
        };

        match mailer.send(subject, body).await {
            Ok(()) => info!("Alert email sent: {}", subject),
            Err(e) => error!("Failed to send alert email '{}': {}", subject, e),
        }
    }

    /// Append to the alert history. Store failures propagate; callers treat
    /// them as job-level errors.
    pub async fn record(&self, record: &NewAlertRecord) -> Result<AlertRecord> {
        self.database.insert_alert_record(record).await
    }
}
