use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use crate::logging::QUEUE_TASKS;

pub const STATUS_SUBJECT: &str = "[Real Estate File Processing Status]";
const STATUS_PASSED: &str = "Your file processed successfully.";
const STATUS_FAILED: &str = "Your file failed processing, please try again.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

pub fn processing_status_mail(from: &str, to: &str, passed: bool) -> OutgoingMail {
    let status = if passed { STATUS_PASSED } else { STATUS_FAILED };
    OutgoingMail {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: STATUS_SUBJECT.to_string(),
        text: format!("Dear User\n\n{}\n\nKind regards,", status),
    }
}

/// Outbound mail transport.
pub trait MailSender: Send + Sync {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>>;
}

/// Posts the mail as JSON to an HTTP mail API with bearer authentication.
pub struct HttpMailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpMailSender {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl MailSender for HttpMailSender {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(mail)
                .send()
                .await
                .context("Mail API request failed")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("Mail API returned {}: {}", status, body));
            }
            info!(target: QUEUE_TASKS, to = ?mail.to, "Status mail sent");
            Ok(())
        })
    }
}

/// Writes the mail to the log instead of delivering it. Used when no mail
/// API is configured.
pub struct LogMailSender;

impl MailSender for LogMailSender {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                target: QUEUE_TASKS,
                to = ?mail.to,
                subject = %mail.subject,
                "Mail transport not configured, status mail logged only:\n{}",
                mail.text
            );
            Ok(())
        })
    }
}
