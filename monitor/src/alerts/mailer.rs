//! SMTP delivery.
//!
//! Connection discipline follows the configured port: 465 speaks implicit
//! TLS, 587 upgrades via STARTTLS, 25 stays plain and only authenticates
//! when credentials are configured. Gmail-style app passwords are accepted
//! with embedded spaces; whitespace is stripped before login.

use crate::config::EmailSettings;
use crate::constants::alerts;
use crate::errors::SmtpError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Mailer {
    settings: EmailSettings,
}

impl Mailer {
    pub fn new(settings: EmailSettings) -> Option<Self> {
        if !settings.enabled {
            warn!("Email alerting disabled in configuration");
            return None;
        }
        if settings.smtp_host.trim().is_empty() {
            warn!("Email alerting enabled but smtp_host is empty");
            return None;
        }
        info!(
            "Mailer configured for {}:{} ({})",
            settings.smtp_host,
            settings.smtp_port,
            if settings.use_ssl {
                "implicit TLS"
            } else if settings.use_tls {
                "STARTTLS"
            } else {
                "plain"
            }
        );
        Some(Self { settings })
    }

    pub fn recipients(&self) -> Vec<String> {
        self.settings.recipients()
    }

    pub fn recipients_string(&self) -> String {
        self.recipients().join(", ")
    }

    fn cleaned_password(&self) -> String {
        self.settings.password.trim().replace(' ', "")
    }

    fn use_implicit_tls(&self) -> bool {
        self.settings.use_ssl || self.settings.smtp_port == 465
    }

    fn use_starttls(&self) -> bool {
        !self.use_implicit_tls() && (self.settings.use_tls || self.settings.smtp_port == 587)
    }

    fn build_transport(
        &self,
        with_credentials: bool,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SmtpError> {
        let host = self.settings.smtp_host.as_str();

        let mut builder = if self.use_implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(|e| SmtpError::TlsFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?
        } else if self.use_starttls() {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(|e| {
                SmtpError::TlsFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                }
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        builder = builder
            .port(self.settings.smtp_port)
            .timeout(Some(Duration::from_secs(alerts::SMTP_TIMEOUT_SECONDS)));

        let password = self.cleaned_password();
        if with_credentials && !self.settings.username.is_empty() && !password.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.settings.username.clone(),
                password,
            ));
        }

        Ok(builder.build())
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message, SmtpError> {
        let from: Mailbox = self
            .settings
            .from_email
            .parse()
            .map_err(|e| SmtpError::SendFailed {
                reason: format!("invalid from address '{}': {}", self.settings.from_email, e),
            })?;

        let mut builder = Message::builder().from(from).subject(subject);

        let recipients = self.recipients();
        if recipients.is_empty() {
            return Err(SmtpError::SendFailed {
                reason: "no recipients configured".to_string(),
            });
        }
        for recipient in &recipients {
            let to: Mailbox = recipient.parse().map_err(|e| SmtpError::SendFailed {
                reason: format!("invalid recipient '{}': {}", recipient, e),
            })?;
            builder = builder.to(to);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| SmtpError::SendFailed {
                reason: e.to_string(),
            })
    }

    /// Send one plain-text message to the configured recipients.
    pub async fn send(&self, subject: &str, body: &str) -> Result<(), SmtpError> {
        let message = self.build_message(subject, body)?;
        let transport = self.build_transport(true)?;

        match transport.send(message.clone()).await {
            Ok(_) => {
                debug!("Mail sent: {}", subject);
                Ok(())
            }
            Err(e) => {
                let classified = classify_smtp_error(&self.settings.smtp_host, &e);

                // Plain port 25 servers often do not advertise AUTH at all;
                // retry unauthenticated before giving up.
                let plain = !self.use_implicit_tls() && !self.use_starttls();
                if plain && matches!(classified, SmtpError::AuthFailed { .. }) {
                    debug!("AUTH unavailable on plain SMTP, retrying without credentials");
                    let transport = self.build_transport(false)?;
                    return transport.send(message).await.map(|_| ()).map_err(|e| {
                        classify_smtp_error(&self.settings.smtp_host, &e)
                    });
                }

                Err(classified)
            }
        }
    }
}

fn classify_smtp_error(host: &str, err: &lettre::transport::smtp::Error) -> SmtpError {
    let text = err.to_string();
    let lowered = text.to_lowercase();

    if lowered.contains("auth") || lowered.contains("535") {
        SmtpError::AuthFailed {
            host: host.to_string(),
        }
    } else if lowered.contains("tls") || lowered.contains("certificate") || lowered.contains("handshake") {
        SmtpError::TlsFailed {
            host: host.to_string(),
            reason: text,
        }
    } else if lowered.contains("connection")
        || lowered.contains("refused")
        || lowered.contains("resolve")
        || lowered.contains("timed out")
        || lowered.contains("network")
    {
        SmtpError::ConnectFailed {
            host: host.to_string(),
            reason: text,
        }
    } else {
        SmtpError::SendFailed { reason: text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16, use_tls: bool, use_ssl: bool) -> EmailSettings {
        EmailSettings {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: port,
            use_tls,
            use_ssl,
            username: "user".to_string(),
            password: "abcd efgh ijkl mnop".to_string(),
            from_email: "monitor@example.com".to_string(),
            to_email: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn test_port_discipline() {
        let implicit = Mailer::new(settings(465, false, true)).unwrap();
        assert!(implicit.use_implicit_tls());

        let starttls = Mailer::new(settings(587, true, false)).unwrap();
        assert!(!starttls.use_implicit_tls());
        assert!(starttls.use_starttls());

        let plain = Mailer::new(settings(25, false, false)).unwrap();
        assert!(!plain.use_implicit_tls());
        assert!(!plain.use_starttls());
    }

    #[test]
    fn test_password_whitespace_is_stripped() {
        let mailer = Mailer::new(settings(587, true, false)).unwrap();
        assert_eq!(mailer.cleaned_password(), "abcdefghijklmnop");
    }

    #[test]
    fn test_disabled_settings_yield_no_mailer() {
        let mut s = settings(587, true, false);
        s.enabled = false;
        assert!(Mailer::new(s).is_none());
    }

    #[test]
    fn test_message_requires_recipients() {
        let mut s = settings(587, true, false);
        s.to_email = String::new();
        let mailer = Mailer::new(s).unwrap();
        assert!(mailer.build_message("subject", "body").is_err());
    }
}
