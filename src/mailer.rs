use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::mpsc;

use crate::config::SmtpConfig;

#[derive(Debug)]
pub enum MailError {
    Address(String),
    Build(String),
    Transport(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Address(s) => write!(f, "bad address: {s}"),
            MailError::Build(s) => write!(f, "could not build message: {s}"),
            MailError::Transport(s) => write!(f, "smtp: {s}"),
        }
    }
}

impl std::error::Error for MailError {}

/// Outbound mail. Implementations must not retry on their own.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;
}

/// Sends through an SMTP relay.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("{}: {e}", config.from)))?;
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(Self {
            from,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("{to}: {e}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured: mail is logged and dropped.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), MailError> {
        tracing::info!(target: "mail", "not sending \"{subject}\" to {to}: no SMTP relay configured");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Captures mail on a channel. `failing()` rejects every send instead.
pub struct StubMailer {
    outbox: Option<mpsc::UnboundedSender<SentMail>>,
}

impl StubMailer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentMail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outbox: Some(tx) }, rx)
    }

    pub fn failing() -> Self {
        Self { outbox: None }
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let Some(outbox) = &self.outbox else {
            return Err(MailError::Transport("stub relay refused the message".into()));
        };
        let _ = outbox.send(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_captures_mail() {
        let (mailer, mut rx) = StubMailer::new();
        mailer.send("ada@example.com", "Hi", "<p>x</p>").await.unwrap();
        let mail = rx.recv().await.unwrap();
        assert_eq!(mail.to, "ada@example.com");
        assert_eq!(mail.subject, "Hi");
    }

    #[tokio::test]
    async fn failing_stub_reports_transport_error() {
        let err = StubMailer::failing().send("a@b.c", "s", "h").await.unwrap_err();
        assert!(matches!(err, MailError::Transport(_)));
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_bad_recipient() {
        let mailer = SmtpMailer::new(&SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            user: None,
            password: None,
            from: "reservations@localhost".into(),
        })
        .unwrap();
        let err = mailer.send("not an address", "s", "h").await.unwrap_err();
        assert!(matches!(err, MailError::Address(_)));
    }

    #[test]
    fn smtp_mailer_rejects_bad_sender() {
        let err = SmtpMailer::new(&SmtpConfig {
            host: "localhost".into(),
            port: 25,
            user: None,
            password: None,
            from: "nope".into(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, MailError::Address(_)));
    }
}
