//! Immutable settings shared by every worker of a run.

use std::fmt;

use massmail_smtp::{Attachment, EmailAddress, SmtpConfig, SmtpCredentials};

use crate::error::ConfigError;
use crate::randomize;

/// What a worker does after the server rejects one recipient.
///
/// A transport failure always stops the worker, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFailurePolicy {
    /// Stop the worker on the first failed send.
    #[default]
    AbortWorker,
    /// Record the failure and move on to the next address.
    Continue,
}

impl fmt::Display for SendFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortWorker => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Debug)]
pub struct WorkerConfig {
    pub smtp: SmtpConfig,
    /// Also the envelope sender and `From` address.
    pub credentials: SmtpCredentials,
    pub sender_name: Option<String>,
    pub reply_to: Option<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject_template: String,
    pub body_template: String,
    pub as_html: bool,
    pub attachments: Vec<Attachment>,
    pub failure_policy: SendFailurePolicy,
}

impl WorkerConfig {
    pub fn new(smtp: SmtpConfig, credentials: SmtpCredentials) -> Self {
        Self {
            smtp,
            credentials,
            sender_name: None,
            reply_to: None,
            bcc: Vec::new(),
            subject_template: String::new(),
            body_template: String::new(),
            as_html: false,
            attachments: Vec::new(),
            failure_policy: SendFailurePolicy::default(),
        }
    }

    /// The `From` mailbox: the login name plus the optional display name.
    pub fn sender(&self) -> EmailAddress {
        EmailAddress::with_optional_name(
            self.credentials.username.clone(),
            self.sender_name.as_deref(),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }

        let sender = self.sender();
        if !sender.is_valid() {
            return Err(ConfigError::InvalidAddress {
                field: "sender",
                address: sender.address,
            });
        }
        if let Some(reply_to) = &self.reply_to {
            if !reply_to.is_valid() {
                return Err(ConfigError::InvalidAddress {
                    field: "reply-to",
                    address: reply_to.address.clone(),
                });
            }
        }
        if let Some(bad) = self.bcc.iter().find(|a| !a.is_valid()) {
            return Err(ConfigError::InvalidAddress {
                field: "bcc",
                address: bad.address.clone(),
            });
        }

        let header_text = [
            ("subject", Some(self.subject_template.as_str())),
            ("sender name", self.sender_name.as_deref()),
            (
                "reply-to name",
                self.reply_to.as_ref().and_then(|r| r.name.as_deref()),
            ),
        ];
        for (field, text) in header_text {
            if text.is_some_and(|t| t.contains(['\r', '\n'])) {
                return Err(ConfigError::LineBreak { field });
            }
        }

        randomize::validate(&self.subject_template).map_err(|source| ConfigError::Template {
            field: "subject",
            source,
        })?;
        randomize::validate(&self.body_template).map_err(|source| ConfigError::Template {
            field: "message",
            source,
        })?;
        Ok(())
    }
}
