use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use tracing::{info, warn};

use concierge_config::EmailConfig;

use crate::task::{Capability, TaskOutcome, TaskRequest};

const DEFAULT_SUBJECT: &str = "Message from your assistant";

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmailAction {
    Send,
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EmailDetails {
    to: String,
    subject: String,
    body: String,
}

/// Sends mail through the configured SMTP account.
pub struct EmailCapability {
    config: EmailConfig,
    send_re: Regex,
    schedule_re: Regex,
    address_re: Regex,
    subject_re: Regex,
    body_re: Regex,
}

impl EmailCapability {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if !config.is_configured() {
            warn!("Email configuration incomplete, email tasks will be rejected");
        }
        Ok(Self {
            config: config.clone(),
            send_re: Regex::new(r"(?i)send|compose|write")?,
            schedule_re: Regex::new(r"(?i)schedule")?,
            address_re: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            subject_re: Regex::new(
                r#"(?i)\b(?:subject|about)\b:?\s*["']?([^"',;\n]+?)["']?\s*(?:\bsaying\b|\bbody\b|[,;\n]|$)"#,
            )?,
            body_re: Regex::new(r#"(?i)\b(?:saying|body:?)\s*["']?(.+?)["']?\s*$"#)?,
        })
    }

    fn action(&self, description: &str) -> Option<EmailAction> {
        if self.send_re.is_match(description) {
            Some(EmailAction::Send)
        } else if self.schedule_re.is_match(description) {
            Some(EmailAction::Schedule)
        } else {
            None
        }
    }

    /// Pull recipient, subject and body out of a free-form request. Only the
    /// recipient is mandatory.
    fn parse_details(&self, description: &str) -> Option<EmailDetails> {
        let to = self.address_re.find(description)?.as_str().to_string();
        let subject = self
            .subject_re
            .captures(description)
            .map(|caps| caps[1].trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let body = self
            .body_re
            .captures(description)
            .map(|caps| caps[1].trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| description.to_string());
        Some(EmailDetails { to, subject, body })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.config.host.as_str())
        };
        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(self.config.timeout_secs.max(1))))
            .build())
    }

    async fn send(&self, description: &str) -> Result<TaskOutcome> {
        if !self.config.is_configured() {
            return Ok(TaskOutcome::rejected("Email not configured"));
        }
        let Some(details) = self.parse_details(description) else {
            return Ok(TaskOutcome::rejected(
                "No recipient address found in task description",
            ));
        };

        let from = self
            .config
            .from
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.config.username);
        let message_id = format!(
            "<{}.{}@concierge>",
            Utc::now().timestamp_millis(),
            MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let message = Message::builder()
            .from(from.parse::<Mailbox>()?)
            .to(details.to.parse::<Mailbox>()?)
            .subject(details.subject.as_str())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(details.body.clone())?;

        self.transport()?.send(message).await?;
        info!("Email sent to {} ({message_id})", details.to);

        Ok(TaskOutcome::ok("Email sent successfully")
            .with("messageId", message_id)
            .with("to", details.to)
            .with("subject", details.subject))
    }
}

#[async_trait]
impl Capability for EmailCapability {
    fn task_type(&self) -> &str {
        "email"
    }

    async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome> {
        match self.action(&task.description) {
            Some(EmailAction::Send) => self.send(&task.description).await,
            Some(EmailAction::Schedule) => Ok(TaskOutcome::rejected(
                "Email cannot be deferred directly",
            )
            .with(
                "note",
                "Schedule the send request itself with a cron expression, e.g. `concierge schedule \"send an email to ...\" \"0 9 * * 1\"`",
            )),
            None => Ok(TaskOutcome::rejected("Email action not recognized")),
        }
    }
}
