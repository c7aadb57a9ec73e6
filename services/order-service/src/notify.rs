//! Outbound email.
//!
//! Every send is best-effort relative to the operation that triggered it: it
//! happens after the state change is durable, is bounded by a timeout, and a
//! failure is logged and counted but never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use thiserror::Error;

use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail send timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotifyError>;
}

// -----------------------------------------------------------------------------
// AWS SES
// -----------------------------------------------------------------------------

pub struct SesMailer {
    client: SesClient,
}

impl SesMailer {
    pub async fn from_env(region: Option<String>) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = match region {
            Some(region) => {
                let ses_config = aws_config
                    .to_builder()
                    .region(aws_config::Region::new(region))
                    .build();
                SesClient::new(&ses_config)
            }
            None => SesClient::new(&aws_config),
        };
        Self { client }
    }
}

fn transport<E: std::fmt::Display>(err: E) -> NotifyError {
    NotifyError::Transport(err.to_string())
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let subject = Content::builder()
            .data(&email.subject)
            .build()
            .map_err(transport)?;
        let text = Content::builder()
            .data(&email.body)
            .build()
            .map_err(transport)?;

        let body = Body::builder().text(text).build();
        let message = Message::builder().subject(subject).body(body).build();

        self.client
            .send_email()
            .from_email_address(&email.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(transport)?;

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// LOG ONLY
// -----------------------------------------------------------------------------

/// Development transport: the message only goes to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        tracing::info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Email (log transport)"
        );
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// NOTIFIER
// -----------------------------------------------------------------------------

/// Sender address, timeout and metrics around a [`Mailer`].
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    from: String,
    timeout: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mailer,
            from: from.into(),
            timeout,
        }
    }

    pub async fn try_send(
        &self,
        kind: &'static str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let email = Email {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        let result = match tokio::time::timeout(self.timeout, self.mailer.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout)),
        };
        metrics::record_notification(kind, result.is_ok());
        result
    }

    /// Send and swallow the error. Returns whether the email went out.
    pub async fn send_best_effort(
        &self,
        kind: &'static str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> bool {
        match self.try_send(kind, to, subject, body).await {
            Ok(()) => {
                tracing::info!(kind, to, "Notification sent");
                true
            }
            Err(e) => {
                tracing::warn!(kind, to, error = %e, "Notification failed");
                false
            }
        }
    }
}

// -----------------------------------------------------------------------------
// TEST DOUBLES
// -----------------------------------------------------------------------------
