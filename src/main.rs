use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use massmail::{logging, Cli};
use tracing::{error, info, warn};

/// Some sends failed, some sessions never opened, or addresses were left.
const EXIT_INCOMPLETE: u8 = 1;
/// Bad arguments, unreadable files or malformed templates.
const EXIT_CONFIG: u8 = 2;

fn read_password(cli: &Cli) -> Result<String> {
    match cli.given_password() {
        Some(p) => Ok(p.to_string()),
        None => rpassword::prompt_password("Password: ").context("failed to read password"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbosity) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(EXIT_CONFIG);
    }
    // Only `ring` is compiled in; an error just means it is already set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mailing = match read_password(&cli).and_then(|password| massmail::prepare(&cli, password)) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!("start mailing");
    let summary = massmail::send(mailing).await;
    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        unserved = summary.unserved.len(),
        "finished mailing"
    );

    if let Some(path) = &cli.report {
        if let Err(e) = massmail::write_report(path, &summary) {
            error!("{:#}", e);
        }
    }

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        warn!(
            sessions_failed = summary.sessions_failed,
            failed = summary.failed,
            unserved = summary.unserved.len(),
            "mailing incomplete"
        );
        ExitCode::from(EXIT_INCOMPLETE)
    }
}
