//! One authenticated SMTP connection with an explicit lifecycle.
//!
//! `Unopened -> Open -> Closed`. A failed `open` leaves the session
//! `Unopened`; a transport failure during `send_one` moves it to `Closed`.

use log::{debug, info, warn};

use crate::auth;
use crate::client::SmtpClient;
use crate::message::OutgoingMail;
use crate::types::*;

/// Lifecycle state of a [`MailSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

/// A mail session owned by exactly one sender.
pub struct MailSession {
    client: SmtpClient,
    state: SessionState,
}

impl MailSession {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            client: SmtpClient::new(config),
            state: SessionState::Unopened,
        }
    }

    /// Create a session and open it in one step.
    pub async fn connect(config: SmtpConfig, credentials: &SmtpCredentials) -> SmtpResult<Self> {
        let mut session = Self::new(config);
        session.open(credentials).await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn messages_sent(&self) -> u64 {
        self.client.messages_sent()
    }

    pub fn capabilities(&self) -> Option<&EhloCapabilities> {
        self.client.capabilities()
    }

    /// Connect, negotiate transport security and authenticate.
    pub async fn open(&mut self, credentials: &SmtpCredentials) -> SmtpResult<()> {
        if self.state != SessionState::Unopened {
            return Err(SmtpError::config(format!(
                "Session cannot be opened from state {:?}",
                self.state
            )));
        }

        match self.handshake(credentials).await {
            Ok(()) => {
                self.state = SessionState::Open;
                info!(
                    "Session open to {} ({}) as {}",
                    self.client.config().address(),
                    self.client.config().security,
                    credentials.username
                );
                Ok(())
            }
            Err(e) => {
                self.client.abort();
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, credentials: &SmtpCredentials) -> SmtpResult<()> {
        self.client.connect().await?;
        let caps = self.client.ehlo().await?;

        if self.client.config().security == SmtpSecurity::StartTls {
            if !caps.starttls {
                return Err(SmtpError::tls("Server does not advertise STARTTLS"));
            }
            self.client.starttls().await?;
        }

        auth::authenticate(&mut self.client, credentials).await
    }

    /// Build and transmit one message.
    ///
    /// A transport error closes the session. A server rejection keeps it
    /// open and resets the transaction.
    pub async fn send_one(&mut self, mail: &OutgoingMail<'_>) -> SmtpResult<()> {
        if self.state != SessionState::Open {
            return Err(SmtpError::connection(format!(
                "Session is not open (state {:?})",
                self.state
            )));
        }

        let envelope = mail.compose()?;
        let recipients: Vec<&str> = envelope.recipients.iter().map(String::as_str).collect();

        match self
            .client
            .send_envelope(&envelope.from, &recipients, &envelope.data)
            .await
        {
            Ok(reply) => {
                debug!("Delivered to {}: {}", mail.recipient, reply);
                Ok(())
            }
            Err(e) if e.is_transport() => {
                warn!("Transport failure, closing session: {}", e);
                self.client.abort();
                self.state = SessionState::Closed;
                Err(e)
            }
            Err(e) => {
                if let Err(reset_err) = self.client.reset().await {
                    warn!("RSET failed, closing session: {}", reset_err);
                    self.client.abort();
                    self.state = SessionState::Closed;
                }
                Err(e)
            }
        }
    }

    /// Send QUIT and mark the session closed. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state == SessionState::Open {
            self.client.quit().await;
        }
        self.state = SessionState::Closed;
    }
}
