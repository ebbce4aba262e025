//! The SMTP conversation over one TCP connection: greeting, EHLO,
//! STARTTLS, commands and replies, and the MAIL/RCPT/DATA transaction.
//!
//! Every network wait goes through [`with_deadline`], so the optional
//! timeouts in [`SmtpConfig`] apply uniformly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::types::*;

// ─── Stream ─────────────────────────────────────────────────────────

enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read_line(buf).await,
            Self::Tls(s) => s.read_line(buf).await,
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => {
                s.get_mut().write_all(bytes).await?;
                s.get_mut().flush().await
            }
            Self::Tls(s) => {
                s.get_mut().write_all(bytes).await?;
                s.get_mut().flush().await
            }
        }
    }
}

/// Await `fut`, giving up after `secs` when a bound is configured.
async fn with_deadline<T>(
    secs: Option<u64>,
    what: &str,
    fut: impl Future<Output = SmtpResult<T>>,
) -> SmtpResult<T> {
    let Some(secs) = secs else {
        return fut.await;
    };
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(SmtpError::io(format!("{} timed out after {}s", what, secs))),
    }
}

/// Normalise line endings to CRLF and double any leading dot
/// (RFC 5321 §4.5.2). The result always ends with CRLF.
fn stuff_dots(body: &str) -> String {
    let body = body.strip_suffix('\n').unwrap_or(body);
    let body = body.strip_suffix('\r').unwrap_or(body);
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 2);
    for line in body.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

// ─── Client ─────────────────────────────────────────────────────────

pub struct SmtpClient {
    config: SmtpConfig,
    stream: Option<SmtpStream>,
    capabilities: Option<EhloCapabilities>,
    messages_sent: u64,
}

impl SmtpClient {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            stream: None,
            capabilities: None,
            messages_sent: 0,
        }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Capabilities from the most recent EHLO on this connection.
    pub fn capabilities(&self) -> Option<&EhloCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.stream, Some(SmtpStream::Tls(_)))
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Open the TCP connection (and the TLS layer for SMTPS), then read
    /// the greeting. An error greeting is a `ConnectionError`.
    pub async fn connect(&mut self) -> SmtpResult<SmtpReply> {
        let addr = self.config.address();
        debug!("Connecting to {}", addr);

        let tcp = with_deadline(self.config.connect_timeout_secs, "Connect", async {
            TcpStream::connect(&addr).await.map_err(SmtpError::from_io)
        })
        .await
        .map_err(|e| SmtpError::connection(format!("Connection to {} failed: {}", addr, e.message)))?;

        self.stream = Some(match self.config.security {
            SmtpSecurity::ImplicitTls => SmtpStream::Tls(Box::new(BufReader::new(self.handshake(tcp).await?))),
            SmtpSecurity::None | SmtpSecurity::StartTls => SmtpStream::Plain(BufReader::new(tcp)),
        });

        let greeting = self.read_reply().await?;
        if greeting.is_error() {
            self.abort();
            return Err(SmtpError::connection(format!(
                "{} refused the session: {}",
                addr,
                greeting.text()
            ))
            .with_code(greeting.code));
        }
        info!("Connected to {}: {}", addr, greeting.text());
        Ok(greeting)
    }

    /// EHLO, or HELO when the server does not speak ESMTP.
    pub async fn ehlo(&mut self) -> SmtpResult<EhloCapabilities> {
        let ehlo = format!("EHLO {}", self.config.ehlo_domain);
        let reply = self.command(&ehlo).await?;
        let caps = if reply.is_positive() {
            EhloCapabilities::parse(&reply)
        } else {
            debug!("EHLO refused ({}), falling back to HELO", reply.code);
            let helo = format!("HELO {}", self.config.ehlo_domain);
            let reply = self.command(&helo).await?;
            if !reply.is_positive() {
                return Err(reply.to_error("HELO rejected"));
            }
            EhloCapabilities {
                server_name: reply.lines.first().cloned().unwrap_or_default(),
                ..EhloCapabilities::default()
            }
        };
        self.capabilities = Some(caps.clone());
        Ok(caps)
    }

    /// Upgrade the plain connection in place, then greet again over TLS
    /// (RFC 3207 §4.2: earlier capabilities must be discarded).
    pub async fn starttls(&mut self) -> SmtpResult<()> {
        let reply = self.command("STARTTLS").await?;
        if !reply.is_positive() {
            return Err(SmtpError::tls(format!("STARTTLS refused: {}", reply)));
        }

        let tcp = match self.stream.take() {
            Some(SmtpStream::Plain(s)) => s.into_inner(),
            Some(SmtpStream::Tls(_)) => return Err(SmtpError::tls("Connection is already encrypted")),
            None => return Err(SmtpError::io("Not connected")),
        };
        self.capabilities = None;
        self.stream = Some(SmtpStream::Tls(Box::new(BufReader::new(self.handshake(tcp).await?))));
        debug!("STARTTLS negotiated with {}", self.config.host);

        self.ehlo().await.map(|_| ())
    }

    /// Polite shutdown. The QUIT reply is not required.
    pub async fn quit(&mut self) {
        if self.stream.is_some() {
            if let Err(e) = self.command("QUIT").await {
                debug!("QUIT failed: {}", e);
            }
            info!("Disconnected from {}", self.config.address());
        }
        self.abort();
    }

    /// Drop the socket without any exchange.
    pub fn abort(&mut self) {
        self.stream = None;
        self.capabilities = None;
    }

    /// RSET, so the next transaction starts from a clean state.
    pub async fn reset(&mut self) -> SmtpResult<()> {
        let reply = self.command("RSET").await?;
        if reply.is_positive() {
            Ok(())
        } else {
            Err(reply.to_error("RSET rejected"))
        }
    }

    /// One full transaction. Fails on the first refused step.
    pub async fn send_envelope(
        &mut self,
        from: &str,
        recipients: &[&str],
        data: &str,
    ) -> SmtpResult<SmtpReply> {
        self.expect_positive(&format!("MAIL FROM:<{}>", from), "MAIL FROM rejected")
            .await?;
        for rcpt in recipients {
            self.expect_positive(
                &format!("RCPT TO:<{}>", rcpt),
                &format!("RCPT TO rejected for {}", rcpt),
            )
            .await?;
        }

        let go_ahead = self.command("DATA").await?;
        if !go_ahead.is_intermediate() {
            return Err(go_ahead.to_error("DATA rejected"));
        }
        let mut payload = stuff_dots(data);
        payload.push_str(".\r\n");
        self.write(payload.as_bytes()).await?;

        let accepted = self.read_reply().await?;
        if !accepted.is_positive() {
            return Err(accepted.to_error("Message rejected"));
        }
        self.messages_sent += 1;
        Ok(accepted)
    }

    async fn expect_positive(&mut self, cmd: &str, context: &str) -> SmtpResult<SmtpReply> {
        let reply = self.command(cmd).await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(reply.to_error(context))
        }
    }

    /// Send one command line and wait for the whole reply.
    pub async fn command(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        debug!("C: {}", cmd);
        self.write(format!("{}\r\n", cmd).as_bytes()).await?;
        self.read_reply().await
    }

    /// [`command`](Self::command) for lines carrying credentials.
    pub async fn command_sensitive(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        debug!("C: <credentials hidden>");
        self.write(format!("{}\r\n", cmd).as_bytes()).await?;
        self.read_reply().await
    }

    async fn write(&mut self, bytes: &[u8]) -> SmtpResult<()> {
        let secs = self.config.io_timeout_secs;
        let stream = self.stream.as_mut().ok_or_else(|| SmtpError::io("Not connected"))?;
        with_deadline(secs, "Write", async {
            stream.send(bytes).await.map_err(SmtpError::from_io)
        })
        .await
    }

    /// Collect lines until one has a space (or nothing) after the code.
    async fn read_reply(&mut self) -> SmtpResult<SmtpReply> {
        let secs = self.config.io_timeout_secs;
        let stream = self.stream.as_mut().ok_or_else(|| SmtpError::io("Not connected"))?;

        let mut raw = String::new();
        loop {
            let start = raw.len();
            let n = with_deadline(secs, "Read", async {
                stream.read_line(&mut raw).await.map_err(SmtpError::from_io)
            })
            .await?;
            if n == 0 {
                return Err(SmtpError::io("Connection closed by server"));
            }
            let line = raw[start..].trim_end();
            debug!("S: {}", line);
            if line.as_bytes().get(3).map_or(true, |&b| b == b' ') {
                break;
            }
        }
        SmtpReply::parse(&raw)
    }

    // ── TLS ─────────────────────────────────────────────────────────

    async fn handshake(&self, tcp: TcpStream) -> SmtpResult<TlsStream<TcpStream>> {
        let connector = tls_connector(&self.config).await?;
        let server_name = rustls::pki_types::ServerName::try_from(self.config.host.clone())
            .map_err(|e| SmtpError::tls(format!("Invalid server name {:?}: {}", self.config.host, e)))?;

        with_deadline(self.config.connect_timeout_secs, "TLS handshake", async {
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))
        })
        .await
    }
}

/// Web PKI roots plus the optional PEM bundle, or no verification at all
/// when the config asks for it.
async fn tls_connector(config: &SmtpConfig) -> SmtpResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &config.ca_cert_path {
        let pem = tokio::fs::read(path)
            .await
            .map_err(|e| SmtpError::tls(format!("Cannot read CA bundle {}: {}", path, e)))?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| SmtpError::tls(format!("Bad certificate in {}: {}", path, e)))?;
            roots
                .add(cert)
                .map_err(|e| SmtpError::tls(format!("Unusable certificate in {}: {}", path, e)))?;
        }
    }

    let mut tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if !config.verify_certificates {
        warn!("TLS certificate verification is disabled for {}", config.host);
        tls.dangerous().set_certificate_verifier(Arc::new(AcceptAnyCert::new()));
    }
    Ok(TlsConnector::from(Arc::new(tls)))
}

/// Verifier for `--insecure`: any certificate is accepted, but handshake
/// signatures are still checked with the ring provider.
#[derive(Debug)]
struct AcceptAnyCert(rustls::crypto::WebPkiSupportedAlgorithms);

impl AcceptAnyCert {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.supported_schemes()
    }
}
