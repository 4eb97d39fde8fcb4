//! Message Delivery
//! Mission: Hand out-of-band action tokens to whatever delivers mail

use crate::error::AuthError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Named config module holding [`MailSettings`]
pub const MAIL_CONFIG_MODULE: &str = "mail";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailSettings {
    pub sender: String,
    /// Prefix for links embedded in messages; the token is appended
    pub link_base: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: "noreply@localhost".to_string(),
            link_base: "http://localhost:3000/confirm?token=".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), AuthError>;
}

/// Records deliveries in the log instead of talking to SMTP. Nothing leaves
/// the process: production deployments plug in a real [`Mailer`]. The body,
/// which carries the action link, is only logged at debug level.
pub struct LogMailer {
    settings: MailSettings,
}

impl LogMailer {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: OutgoingMessage) -> Result<(), AuthError> {
        info!(
            from = %self.settings.sender,
            to = %message.to,
            subject = %message.subject,
            "📧 Message queued"
        );
        debug!(to = %message.to, body = %message.body, "📧 Message body");
        Ok(())
    }
}

/// Keeps every message in memory; handy for tests and local tooling
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<OutgoingMessage>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: OutgoingMessage) -> Result<(), AuthError> {
        self.outbox.lock().push(message);
        Ok(())
    }
}

pub fn action_link(settings: &MailSettings, token: &str) -> String {
    format!("{}{}", settings.link_base, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_mailer_records() {
        let mailer = MemoryMailer::default();
        mailer
            .send(OutgoingMessage {
                to: "a@x.com".to_string(),
                subject: "hi".to_string(),
                body: "body".to_string(),
            })
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_messages() {
        let mailer = LogMailer::new(MailSettings::default());
        let result = mailer
            .send(OutgoingMessage {
                to: "a@x.com".to_string(),
                subject: "hi".to_string(),
                body: action_link(&MailSettings::default(), "abc"),
            })
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_action_link() {
        let settings = MailSettings::default();
        assert!(action_link(&settings, "abc").ends_with("token=abc"));
    }
}
