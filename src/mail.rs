//! Email delivery collaborators.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::MailError;

/// Sends one HTML email. Called from inside a spawned task, so a slow send
/// never holds up the request that triggered it.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<(), MailError>;
}

/// SMTP delivery through `lettre`.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    /// # Errors
    ///
    /// Returns an error if the relay host cannot be used for STARTTLS.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(credentials)
            .build();
        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<(), MailError> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| MailError::InvalidAddress(format!("from {}: {e}", self.from)))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailError::InvalidAddress(format!("to {to}: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body_html.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        tracing::info!(%to, %subject, "email sent");
        Ok(())
    }
}

/// Writes the email to the log instead of sending it. Used when no SMTP
/// relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> Result<(), MailError> {
        tracing::info!(%to, %subject, bytes = body_html.len(), "email delivery disabled, logged only");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        tokio_test::assert_ok!(LogMailer.send("a@example.com", "hi", "<p>hi</p>").await);
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_bad_recipient_before_connecting() {
        let mailer = SmtpMailer::new(&SmtpConfig {
            host: "smtp.example.com".into(),
            port: 2525,
            username: "user".into(),
            password: "secret".into(),
            from: "Fleet <noreply@example.com>".into(),
        })
        .unwrap();
        let result = mailer.send("not an address", "subject", "<p>body</p>").await;
        assert!(matches!(result, Err(MailError::InvalidAddress(_))));
    }
}
