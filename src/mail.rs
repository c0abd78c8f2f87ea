use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::MailConfig;

/// Outbound email: recipients, subject, plain-text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()>;
}

/// Builds the SMTP mailer when configured, otherwise one that only logs.
pub fn from_config(cfg: &MailConfig) -> anyhow::Result<std::sync::Arc<dyn Mailer>> {
    if cfg.is_configured() {
        Ok(std::sync::Arc::new(SmtpMailer::new(cfg)?))
    } else {
        warn!("SMTP not configured, outgoing mail will only be logged");
        Ok(std::sync::Arc::new(LogMailer))
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let host = cfg.smtp_host.as_deref().context("SMTP host not configured")?;
        let address = cfg
            .from_address
            .as_deref()
            .context("from address not configured")?;
        let from: Mailbox = format!("{} <{}>", cfg.from_name, address)
            .parse()
            .context("parse from mailbox")?;

        let builder = if cfg.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).context("smtp relay")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        }
        .port(cfg.smtp_port);

        let builder = match (&cfg.smtp_username, &cfg.smtp_password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        anyhow::ensure!(!message.to.is_empty(), "no recipients");

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.subject.as_str());
        for to in &message.to {
            let mailbox: Mailbox = to.parse().with_context(|| format!("parse recipient {to}"))?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .context("build email")?;

        self.transport.send(email).await.context("smtp send")?;
        info!(to = ?message.to, subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Stand-in used when no SMTP server is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        info!(to = ?message.to, subject = %message.subject, "email not sent, SMTP disabled");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every message; fails on demand.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<MailMessage>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingMailer {
        pub fn messages(&self) -> Vec<MailMessage> {
            self.sent.lock().unwrap().clone()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
