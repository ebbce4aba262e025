//! **massmail**: mass mailing via SMTP.
//!
//! Turns the command line into a [`WorkerConfig`], loads the recipient list
//! and hands both to a [`Dispatcher`] backed by real SMTP sessions.

pub mod cli;
pub mod input;
pub mod logging;

use std::path::Path;

use anyhow::{Context, Result};
use massmail_dispatch::{DispatchSummary, Dispatcher, SmtpConnector, WorkerConfig};
use massmail_smtp::{Attachment, EmailAddress, SmtpConfig, SmtpCredentials};

pub use cli::Cli;

/// Everything the run needs, checked before any connection is made.
#[derive(Debug)]
pub struct Mailing {
    pub config: WorkerConfig,
    pub recipients: Vec<String>,
    pub workers: usize,
}

/// Build the worker configuration from parsed arguments and a password.
pub fn build_config(cli: &Cli, password: String) -> Result<WorkerConfig> {
    let smtp = SmtpConfig {
        host: cli.host.trim().to_string(),
        port: cli.port,
        security: cli.security(),
        connect_timeout_secs: cli.timeout,
        io_timeout_secs: cli.timeout,
        ehlo_domain: cli.ehlo_domain.clone(),
        verify_certificates: !cli.insecure,
        ca_cert_path: cli.ca_cert.as_ref().map(|p| p.display().to_string()),
    };

    let mut config = WorkerConfig::new(smtp, SmtpCredentials::new(cli.username.trim(), password));
    config.sender_name = cli.sender_name.clone();
    config.reply_to = cli
        .reply_to
        .as_deref()
        .map(|addr| EmailAddress::with_optional_name(addr.trim(), cli.reply_name.as_deref()));
    config.bcc = cli
        .bcc
        .iter()
        .map(|b| EmailAddress::parse(b).with_context(|| format!("invalid --bcc {:?}", b)))
        .collect::<Result<_>>()?;
    config.subject_template = cli.subject.clone();
    config.body_template = cli.message.clone();
    config.as_html = cli.as_html;
    config.attachments = cli
        .attachments
        .iter()
        .map(|path| {
            Attachment::from_path(path)
                .with_context(|| format!("cannot attach {}", path.display()))
        })
        .collect::<Result<_>>()?;
    config.failure_policy = cli.on_send_error.into();

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Validate everything and load the recipients. No network I/O.
pub fn prepare(cli: &Cli, password: String) -> Result<Mailing> {
    let config = build_config(cli, password)?;
    let recipients = input::read_recipients(&cli.emails_file)?;
    Ok(Mailing {
        config,
        recipients,
        workers: cli.workers,
    })
}

/// Send to every recipient over real SMTP sessions.
pub async fn send(mailing: Mailing) -> DispatchSummary {
    Dispatcher::new(SmtpConnector, mailing.config)
        .run(mailing.recipients, mailing.workers)
        .await
}

pub fn write_report(path: &Path, summary: &DispatchSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))
}
