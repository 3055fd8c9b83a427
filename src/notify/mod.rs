/// Mail delivery for out-of-band alerts.
///
/// The monitor only talks to the [`Mailer`] trait. Implementations:
/// - `HttpMailer` posts messages to a mail relay API.
/// - `LogMailer` writes them to the log when no relay is configured.
/// - `MemoryMailer` keeps them in memory, for tests and dry runs.

use parking_lot::Mutex;
use thiserror::Error;

pub mod http;
pub mod message;

pub use http::HttpMailer;
pub use message::AlertMessage;

/// Errors returned by a mail backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No relay endpoint or credentials are configured.
    #[error("mail delivery is not configured")]
    NotConfigured,
    /// The relay answered with a non-2xx status.
    #[error("mail relay returned HTTP {0}")]
    Http(u16),
    /// The request never got an answer (connect, TLS, timeout).
    #[error("mail relay unreachable: {0}")]
    Transport(String),
    /// The relay refused this recipient.
    #[error("recipient {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// A mail-delivery backend.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

impl<M: Mailer + ?Sized> Mailer for std::sync::Arc<M> {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        (**self).send(to, subject, body)
    }
}

impl<M: Mailer + ?Sized> Mailer for Box<M> {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        (**self).send(to, subject, body)
    }
}

// ---------------------------------------------------------------------------
// Log-only backend
// ---------------------------------------------------------------------------

/// Logs each message instead of sending it. Always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        tracing::warn!(
            component = "mailer",
            to,
            subject,
            "Mail relay not configured, alert not sent:\n{}",
            body
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every message. Can be switched to fail, to exercise delivery
/// error handling.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentMail>>,
    failure: Mutex<Option<DeliveryError>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `send` fail with `err` (`None` restores success).
    pub fn fail_with(&self, err: Option<DeliveryError>) {
        *self.failure.lock() = err;
    }

    /// Messages accepted so far. Failed sends are not recorded.
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.sent.lock().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_mailer_records_and_fails_on_demand() {
        let mailer = MemoryMailer::new();
        mailer.send("a@example.com", "s", "b").unwrap();

        mailer.fail_with(Some(DeliveryError::Http(502)));
        assert_eq!(mailer.send("a@example.com", "s", "b"), Err(DeliveryError::Http(502)));
        assert_eq!(mailer.sent().len(), 1, "failed sends must not be recorded");

        mailer.fail_with(None);
        mailer.send("b@example.com", "s2", "b2").unwrap();
        assert_eq!(mailer.sent()[1].to, "b@example.com");
    }

    #[test]
    fn test_log_mailer_always_succeeds() {
        assert!(LogMailer.send("a@example.com", "subject", "body").is_ok());
    }
}
