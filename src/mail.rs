//! Outbound mail port
//!
//! Transport lives outside this service; the default sender only logs.

use crate::error::AppError;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, html_body: &str) -> Result<(), AppError>;
}

/// Logs recipients and subject; the body may hold secrets and is not logged
#[derive(Debug, Clone, Default)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, to: &[String], subject: &str, _html_body: &str) -> Result<(), AppError> {
        info!(recipients = ?to, subject, "Mail handed to log sender");
        Ok(())
    }
}
