use super::{ChannelError, ReportChannel};
use crate::config::SmtpConfig;
use crate::models::ReportFormat;
use crate::services::report::RenderedReport;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;

/// Sends the HTML report as an e-mail over STARTTLS.
pub struct SmtpChannel {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpChannel {
    pub fn new(config: SmtpConfig) -> Result<Self, ChannelError> {
        if config.recipients.is_empty() {
            return Err(ChannelError::Configuration(
                "SMTP channel needs at least one recipient".to_string(),
            ));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ChannelError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port);
        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.expose_secret().clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    fn message(&self, report: &RenderedReport) -> Result<Message, ChannelError> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| ChannelError::Configuration(format!("Invalid from address: {}", e)))?;

        let mut builder = Message::builder().from(from).subject(&self.config.subject);
        for recipient in &self.config.recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }
        for cc in self
            .config
            .cc
            .iter()
            .flat_map(|list| list.split(','))
            .map(str::trim)
            .filter(|cc| !cc.is_empty())
        {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(report.body.clone())
            .map_err(|e| ChannelError::SendFailed(format!("Failed to build message: {}", e)))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ChannelError> {
    address
        .trim()
        .parse()
        .map_err(|e| ChannelError::InvalidRecipient(format!("{address}: {e}")))
}

#[async_trait]
impl ReportChannel for SmtpChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn format(&self) -> ReportFormat {
        ReportFormat::Html
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<(), ChannelError> {
        let message = self.message(report)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            recipients = self.config.recipients.len(),
            subject = %self.config.subject,
            "Report e-mailed"
        );
        Ok(())
    }
}
