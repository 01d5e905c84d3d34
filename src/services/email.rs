//! Outbound email
//!
//! `EmailSender` is the only seam to the mail system. Production uses
//! `SmtpEmailSender` (lettre over STARTTLS); tests substitute a recorder.
//! Account flows never wait on delivery: `dispatch_best_effort` spawns the
//! send and logs failures.

use crate::config::EmailConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::error::Error as _;
use std::sync::Arc;
use tera::{Context as TeraContext, Tera};
use tokio::task::JoinHandle;

/// A rendered message ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery errors
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// Outbound email capability
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), SendError>;
}

/// SMTP sender using a pooled lettre transport built once at startup
pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self, SendError> {
        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| SendError::InvalidAddress(format!("{}: {}", config.from_address, e)))?;

        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| SendError::Transport(e.to_string()))?
            .credentials(creds)
            .port(config.smtp_port)
            .build();

        Ok(Self { mailer, from })
    }

    pub fn boxed(config: &EmailConfig) -> Result<Arc<dyn EmailSender>, SendError> {
        Ok(Arc::new(Self::new(config)?))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<(), SendError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| SendError::InvalidAddress(format!("{}: {}", email.to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html)
            .map_err(|e| SendError::Build(e.to_string()))?;

        self.mailer.send(message).await.map_err(|e| {
            let mut msg = e.to_string();
            if let Some(source) = e.source() {
                msg.push_str(&format!(": {}", source));
            }
            SendError::Transport(msg)
        })?;

        Ok(())
    }
}

/// Handle to a detached delivery. HTTP handlers drop it; tests may await it.
#[derive(Debug)]
pub struct DeliveryHandle(JoinHandle<Result<(), SendError>>);

impl DeliveryHandle {
    /// Wait for the delivery attempt. A panicked task counts as a transport failure.
    pub async fn wait(self) -> Result<(), SendError> {
        self.0
            .await
            .unwrap_or_else(|e| Err(SendError::Transport(format!("delivery task failed: {}", e))))
    }
}

/// Send `email` on a detached task. Failures are logged, never propagated
/// to the caller's flow.
pub fn dispatch_best_effort(sender: Arc<dyn EmailSender>, email: OutgoingEmail) -> DeliveryHandle {
    DeliveryHandle(tokio::spawn(async move {
        let to = email.to.clone();
        let subject = email.subject.clone();
        let result = sender.send(email).await;

        match &result {
            Ok(()) => tracing::debug!(%to, %subject, "Email sent"),
            Err(e) => tracing::warn!(%to, %subject, error = %e, "Email delivery failed"),
        }

        result
    }))
}

/// HTML bodies for account emails, compiled into the binary
pub struct EmailTemplates {
    tera: Tera,
    app_name: String,
}

impl EmailTemplates {
    pub fn new(app_name: impl Into<String>) -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.html", include_str!("../../templates/email/base.html")),
            (
                "verify_email.html",
                include_str!("../../templates/email/verify_email.html"),
            ),
            (
                "reset_password.html",
                include_str!("../../templates/email/reset_password.html"),
            ),
        ])
        .map_err(|e| anyhow::anyhow!("Failed to load email templates: {}", e))?;

        Ok(Self {
            tera,
            app_name: app_name.into(),
        })
    }

    pub fn verification(
        &self,
        name: &str,
        code: &str,
        link: &str,
        expires_in_hours: i64,
    ) -> anyhow::Result<String> {
        let mut context = self.base_context(name, link, expires_in_hours);
        context.insert("code", code);
        self.render("verify_email.html", &context)
    }

    pub fn password_reset(
        &self,
        name: &str,
        link: &str,
        expires_in_hours: i64,
    ) -> anyhow::Result<String> {
        let context = self.base_context(name, link, expires_in_hours);
        self.render("reset_password.html", &context)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    fn base_context(&self, name: &str, link: &str, expires_in_hours: i64) -> TeraContext {
        let mut context = TeraContext::new();
        context.insert("app_name", &self.app_name);
        context.insert("name", name);
        context.insert("link", link);
        context.insert("expires_in_hours", &expires_in_hours);
        context
    }

    fn render(&self, template: &str, context: &TeraContext) -> anyhow::Result<String> {
        self.tera.render(template, context).map_err(|e| {
            let mut error_msg = format!("Failed to render '{}': {}", template, e);
            let mut source = e.source();
            while let Some(s) = source {
                error_msg.push_str(&format!("\n  Caused by: {}", s));
                source = s.source();
            }
            anyhow::anyhow!(error_msg)
        })
    }
}
