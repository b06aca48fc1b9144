//! SMTP report dispatcher (STARTTLS relay with login).

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::report::{render_body, render_subject};
use crate::application::ports::{AlertDispatcher, DeliveryError};
use crate::domain::tracking::AlertBatch;
use crate::infrastructure::config::SmtpSettings;

/// Mails each report to every configured recipient in a single message.
pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl std::fmt::Debug for SmtpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpDispatcher")
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

impl SmtpDispatcher {
    /// Build a dispatcher from settings. No connection is made until the
    /// first report.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidAddress`] if the sender or a recipient does not parse
    /// - [`DeliveryError::Transport`] if the relay host is not a valid TLS name
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let from = parse_mailbox(&settings.from)?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(DeliveryError::InvalidAddress("no recipients".to_string()));
        }

        let credentials = Credentials::new(
            settings.credentials.username().to_string(),
            settings.credentials.password().to_string(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
        })
    }

    fn message(&self, batch: &AlertBatch) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(render_subject(Utc::now()))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(render_body(batch))
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

#[async_trait]
impl AlertDispatcher for SmtpDispatcher {
    async fn send(&self, batch: &AlertBatch) -> Result<(), DeliveryError> {
        let message = self.message(batch)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        tracing::info!(
            spreads = batch.len(),
            recipients = self.recipients.len(),
            "Spread report sent"
        );
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress(format!("{address}: {e}")))
}
