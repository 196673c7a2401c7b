//! SMTP delivery channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use super::{AlertMessage, DeliveryChannel, NotifyConfig};

/// Delivers alerts over SMTP with STARTTLS on the submission port.
///
/// Each dispatch opens a fresh connection. The send itself is blocking I/O,
/// so it runs on a blocking worker; the engine awaits the result without
/// stalling the scheduler.
#[derive(Clone)]
pub struct SmtpChannel {
    relay: String,
    password: String,
}

impl SmtpChannel {
    /// Create a channel for the given relay host and account password.
    pub fn new(relay: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            password: password.into(),
        }
    }

    /// Build a channel from notification settings.
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(
            config.smtp_relay.clone(),
            config.password.clone().unwrap_or_default(),
        )
    }

    fn send_blocking(relay: &str, password: &str, message: &AlertMessage) -> Result<()> {
        let from: Mailbox = message
            .sender
            .parse()
            .with_context(|| format!("invalid sender address {:?}", message.sender))?;

        let mut builder = Message::builder().from(from).subject(message.subject());
        for recipient in &message.recipients {
            let to: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient address {:?}", recipient))?;
            builder = builder.to(to);
        }
        let email = builder.body(message.body()).context("failed to build alert email")?;

        let transport = SmtpTransport::starttls_relay(relay)
            .with_context(|| format!("failed to configure smtp relay {}", relay))?
            .credentials(Credentials::new(message.sender.clone(), password.to_string()))
            .build();

        transport.send(&email).context("smtp send failed")?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for SmtpChannel {
    async fn deliver(&self, message: &AlertMessage) -> Result<()> {
        let relay = self.relay.clone();
        let password = self.password.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || Self::send_blocking(&relay, &password, &message))
            .await
            .context("delivery worker task failed")?
    }
}

impl std::fmt::Debug for SmtpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpChannel").field("relay", &self.relay).finish()
    }
}
