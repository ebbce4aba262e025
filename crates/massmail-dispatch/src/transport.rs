//! The seam between workers and the mail transport.

use async_trait::async_trait;
use massmail_smtp::{MailSession, OutgoingMail, SmtpResult};

use crate::config::WorkerConfig;

/// An open, exclusively owned delivery channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, mail: &OutgoingMail<'_>) -> SmtpResult<()>;

    /// `false` once a failure has made the channel unusable.
    fn is_open(&self) -> bool;

    async fn close(&mut self);
}

/// Opens one [`Transport`] per worker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Transport + 'static;

    async fn open(&self, worker_id: usize, config: &WorkerConfig) -> SmtpResult<Self::Session>;
}

#[async_trait]
impl Transport for MailSession {
    async fn send(&mut self, mail: &OutgoingMail<'_>) -> SmtpResult<()> {
        self.send_one(mail).await
    }

    fn is_open(&self) -> bool {
        MailSession::is_open(self)
    }

    async fn close(&mut self) {
        MailSession::close(self).await
    }
}

/// Connects real SMTP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpConnector;

#[async_trait]
impl Connector for SmtpConnector {
    type Session = MailSession;

    async fn open(&self, _worker_id: usize, config: &WorkerConfig) -> SmtpResult<MailSession> {
        MailSession::connect(config.smtp.clone(), &config.credentials).await
    }
}
