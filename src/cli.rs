//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use massmail_dispatch::SendFailurePolicy;
use massmail_smtp::SmtpSecurity;

/// Default pool size: one worker per core, leaving one core free.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnSendError {
    /// Stop the worker that hit the failure
    Abort,
    /// Log the failure and move on to the next address
    Continue,
}

impl From<OnSendError> for SendFailurePolicy {
    fn from(value: OnSendError) -> Self {
        match value {
            OnSendError::Abort => SendFailurePolicy::AbortWorker,
            OnSendError::Continue => SendFailurePolicy::Continue,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "massmail")]
#[command(version)]
#[command(about = "Mass mailing via SMTP", long_about = None)]
pub struct Cli {
    /// SMTP server host
    #[arg(short = 'H', long)]
    pub host: String,

    /// Login name, also used as the sender address
    #[arg(short = 'U', long)]
    pub username: String,

    /// Password (prompted for when absent)
    #[arg(short = 'P', long, env = "MASSMAIL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SMTP server port
    #[arg(short = 'p', long, default_value_t = 25)]
    pub port: u16,

    /// Use implicit TLS (SMTPS)
    #[arg(long, conflicts_with = "starttls")]
    pub ssl: bool,

    /// Upgrade the connection with STARTTLS
    #[arg(long)]
    pub starttls: bool,

    /// Sender display name
    #[arg(long)]
    pub sender_name: Option<String>,

    /// Blind carbon copy. Can be given several times
    #[arg(long, value_name = "ADDRESS")]
    pub bcc: Vec<String>,

    /// Reply address
    #[arg(long, value_name = "ADDRESS")]
    pub reply_to: Option<String>,

    /// Reply display name
    #[arg(long, requires = "reply_to")]
    pub reply_name: Option<String>,

    /// Message body template
    #[arg(short = 'm', long, default_value = "")]
    pub message: String,

    /// Subject template
    #[arg(short = 's', long, default_value = "")]
    pub subject: String,

    /// Send the body as HTML
    #[arg(long)]
    pub as_html: bool,

    /// Attach a file. Can be given several times
    #[arg(short = 'a', long = "attach", value_name = "FILE")]
    pub attachments: Vec<PathBuf>,

    /// Number of concurrent senders
    #[arg(short = 'w', long, default_value_t = default_workers())]
    pub workers: usize,

    /// Increase output verbosity: 0 - warning, 1 - info, 2 - debug
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,

    /// Connect and I/O timeout in seconds (no limit when absent)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Extra CA certificate (PEM) to trust
    #[arg(long, value_name = "PEM")]
    pub ca_cert: Option<PathBuf>,

    /// Domain announced in EHLO
    #[arg(long, default_value = "localhost")]
    pub ehlo_domain: String,

    /// What a worker does when one recipient is rejected
    #[arg(long, value_enum, default_value_t = OnSendError::Abort)]
    pub on_send_error: OnSendError,

    /// Write a JSON summary of the run to this file
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// File with one recipient address per line ("-" reads stdin)
    pub emails_file: PathBuf,
}

impl Cli {
    pub fn security(&self) -> SmtpSecurity {
        if self.ssl {
            SmtpSecurity::ImplicitTls
        } else if self.starttls {
            SmtpSecurity::StartTls
        } else {
            SmtpSecurity::None
        }
    }

    /// Password from the flag or environment, if non-empty.
    pub fn given_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}
