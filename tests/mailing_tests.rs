use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use massmail::{build_config, prepare, send, write_report, Cli, Mailing};
use massmail_dispatch::SendFailurePolicy;
use massmail_smtp::SmtpSecurity;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

fn cli(extra: &[&str]) -> Cli {
    let mut argv = vec!["massmail", "-H", "127.0.0.1", "-U", "news@example.com", "-P", "pw"];
    argv.extend_from_slice(extra);
    Cli::try_parse_from(argv).unwrap()
}

/// Accepts any login; records (connection number, RCPT address) pairs.
async fn spawn_relay(log: Arc<Mutex<Vec<(usize, String)>>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut conn = 0;
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve(socket, conn, log.clone()));
            conn += 1;
        }
    });
    port
}

async fn serve(socket: TcpStream, conn: usize, log: Arc<Mutex<Vec<(usize, String)>>>) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read);
    let _ = write.write_all(b"220 relay ESMTP\r\n").await;
    loop {
        let mut line = String::new();
        if lines.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let cmd = line.trim_end();
        let reply: &[u8] = if cmd.starts_with("EHLO") {
            b"250-relay\r\n250 AUTH PLAIN\r\n"
        } else if cmd.starts_with("AUTH") {
            b"235 ok\r\n"
        } else if let Some(rcpt) = cmd.strip_prefix("RCPT TO:") {
            log.lock()
                .unwrap()
                .push((conn, rcpt.trim_matches(|c| c == '<' || c == '>').to_string()));
            b"250 ok\r\n"
        } else if cmd == "DATA" {
            let _ = write.write_all(b"354 go\r\n").await;
            loop {
                let mut l = String::new();
                if lines.read_line(&mut l).await.unwrap_or(0) == 0 {
                    return;
                }
                if l == ".\r\n" {
                    break;
                }
            }
            b"250 queued\r\n"
        } else if cmd == "QUIT" {
            let _ = write.write_all(b"221 bye\r\n").await;
            return;
        } else {
            b"250 ok\r\n"
        };
        if write.write_all(reply).await.is_err() {
            return;
        }
    }
}

#[test]
fn test_build_config_maps_every_option() {
    let dir = tempfile::tempdir().unwrap();
    let attachment = dir.path().join("terms.txt");
    std::fs::write(&attachment, "terms").unwrap();

    let cli = cli(&[
        "-p",
        "587",
        "--starttls",
        "--sender-name",
        "News Desk",
        "--bcc",
        "audit@example.com",
        "--reply-to",
        "help@example.com",
        "--reply-name",
        "Help",
        "-s",
        "{Hi|Hello}",
        "-m",
        "<b>Body</b>",
        "--as-html",
        "-a",
        attachment.to_str().unwrap(),
        "--timeout",
        "30",
        "--insecure",
        "--on-send-error",
        "continue",
        "emails.txt",
    ]);
    let config = build_config(&cli, "pw".into()).unwrap();

    assert_eq!(config.smtp.port, 587);
    assert_eq!(config.smtp.security, SmtpSecurity::StartTls);
    assert_eq!(config.smtp.connect_timeout_secs, Some(30));
    assert_eq!(config.smtp.io_timeout_secs, Some(30));
    assert!(!config.smtp.verify_certificates);
    assert_eq!(config.sender().to_mailbox(), "\"News Desk\" <news@example.com>");
    assert_eq!(config.bcc[0].address, "audit@example.com");
    assert_eq!(config.reply_to.as_ref().unwrap().name.as_deref(), Some("Help"));
    assert_eq!(config.subject_template, "{Hi|Hello}");
    assert!(config.as_html);
    assert_eq!(config.attachments[0].filename, "terms.txt");
    assert_eq!(config.attachments[0].content_type, "text/plain");
    assert_eq!(config.failure_policy, SendFailurePolicy::Continue);
}

#[test]
fn test_malformed_template_is_a_config_error() {
    let cli = cli(&["-m", "Dear {friend", "emails.txt"]);
    let err = build_config(&cli, "pw".into()).unwrap_err();
    assert!(format!("{err:#}").contains("unclosed '{' at byte 5"));
}

#[test]
fn test_line_break_in_subject_is_a_config_error() {
    let cli = cli(&["-s", "Hi\r\nX-Injected: yes", "emails.txt"]);
    let err = build_config(&cli, "pw".into()).unwrap_err();
    assert!(format!("{err:#}").contains("subject contains a line break"));
}

#[test]
fn test_missing_attachment_is_a_config_error() {
    let cli = cli(&["-a", "/no/such/file.pdf", "emails.txt"]);
    let err = build_config(&cli, "pw".into()).unwrap_err();
    assert!(format!("{err:#}").contains("/no/such/file.pdf"));
}

#[test]
fn test_invalid_bcc_is_rejected() {
    let cli = cli(&["--bcc", "not an address", "emails.txt"]);
    assert!(build_config(&cli, "pw".into()).is_err());
}

#[test]
fn test_prepare_reads_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("emails.txt");
    std::fs::write(&list, "a@example.org\n\n b@example.org \n").unwrap();

    let cli = cli(&["-w", "5", list.to_str().unwrap()]);
    let mailing = prepare(&cli, "pw".into()).unwrap();
    assert_eq!(mailing.recipients, vec!["a@example.org", "b@example.org"]);
    assert_eq!(mailing.workers, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_over_real_sessions() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let port = spawn_relay(log.clone()).await;

    let port_arg = port.to_string();
    let cli = cli(&["-p", &port_arg, "-s", "{Hi|Hello}", "-m", "Body", "--timeout", "10", "unused.txt"]);
    let recipients: Vec<String> = (0..12).map(|i| format!("r{i}@example.org")).collect();
    let mailing = Mailing {
        config: build_config(&cli, "pw".into()).unwrap(),
        recipients: recipients.clone(),
        workers: 3,
    };

    let summary = send(mailing).await;
    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.workers_spawned, 3);
    assert_eq!(summary.delivered, 12);

    let log = log.lock().unwrap();
    let seen: BTreeSet<&str> = log.iter().map(|(_, r)| r.as_str()).collect();
    assert_eq!(seen.len(), 12);
    assert_eq!(log.len(), 12);
    let connections: BTreeSet<usize> = log.iter().map(|(c, _)| *c).collect();
    assert!(connections.len() <= 3);

    let dir = tempfile::tempdir().unwrap();
    let report: PathBuf = dir.path().join("report.json");
    write_report(&report, &summary).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["delivered"], 12);
    assert_eq!(json["workers_spawned"], 3);
}

#[tokio::test]
async fn test_unreachable_server_fails_every_session() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    drop(listener);

    let cli = cli(&["-p", &port, "--timeout", "5", "unused.txt"]);
    let mailing = Mailing {
        config: build_config(&cli, "pw".into()).unwrap(),
        recipients: vec!["a@example.org".into(), "b@example.org".into()],
        workers: 2,
    };
    let summary = send(mailing).await;
    assert_eq!(summary.sessions_failed, 2);
    assert_eq!(summary.unserved.len(), 2);
    assert!(!summary.is_success());
}
