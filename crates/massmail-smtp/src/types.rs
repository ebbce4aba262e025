//! Shared types: errors, server settings, credentials, addresses,
//! attachments, the message model and parsed server replies.

use std::fmt;
use std::path::Path;

use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

// ─── Error ──────────────────────────────────────────────────────────

/// What went wrong, coarsely. Decides whether a session survives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpErrorKind {
    /// 4xx / 5xx reply to a command.
    ServerReply,
    /// Credentials refused, or no usable mechanism.
    AuthFailure,
    /// Handshake, certificate or STARTTLS negotiation problem.
    TlsError,
    /// Could not reach the server, or it greeted with an error.
    ConnectionError,
    /// Socket read/write failed or timed out mid-conversation.
    IoError,
    /// The outgoing message could not be built.
    MessageError,
    /// Bad local settings (unreadable files, wrong lifecycle call).
    ConfigError,
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error type for everything in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpError {
    pub kind: SmtpErrorKind,
    pub message: String,
    /// Basic reply code, when the server sent one.
    pub code: Option<u16>,
    /// RFC 3463 status such as `5.1.1`, when the server sent one.
    pub enhanced_code: Option<String>,
}

impl SmtpError {
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            enhanced_code: None,
        }
    }

    pub fn with_code(self, code: u16) -> Self {
        Self {
            code: Some(code),
            ..self
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::AuthFailure, message)
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsError, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::IoError, message)
    }

    pub(crate) fn from_io(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }

    pub fn server(code: u16, message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ServerReply, message).with_code(code)
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::MessageError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigError, message)
    }

    /// True when the connection can no longer be used after this error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            SmtpErrorKind::IoError | SmtpErrorKind::TlsError | SmtpErrorKind::ConnectionError
        )
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[SMTP {}] {}: {}", code, self.kind, self.message),
            None => write!(f, "[SMTP] {}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SmtpError {}

pub type SmtpResult<T> = Result<T, SmtpError>;

// ─── Settings ───────────────────────────────────────────────────────

/// How the connection is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SmtpSecurity {
    /// Cleartext for the whole conversation.
    #[default]
    None,
    /// Cleartext greeting, upgraded in place before authentication.
    StartTls,
    /// TLS from the first byte (SMTPS).
    ImplicitTls,
}

impl fmt::Display for SmtpSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "plain",
            Self::StartTls => "starttls",
            Self::ImplicitTls => "implicit-tls",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpAuthMethod {
    Plain,
    Login,
    CramMd5,
}

impl SmtpAuthMethod {
    /// Mechanism name as advertised after `AUTH` in the EHLO reply.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
        }
    }
}

impl fmt::Display for SmtpAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Where and how to connect. One value is shared by every session of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    /// Bound on the TCP connect and TLS handshake. `None` means no bound.
    pub connect_timeout_secs: Option<u64>,
    /// Bound on every read and write. `None` means no bound.
    pub io_timeout_secs: Option<u64>,
    /// Name announced in EHLO / HELO.
    pub ehlo_domain: String,
    pub verify_certificates: bool,
    /// PEM bundle trusted instead of the built-in web roots.
    pub ca_cert_path: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 25,
            security: SmtpSecurity::None,
            connect_timeout_secs: None,
            io_timeout_secs: None,
            ehlo_domain: "localhost".into(),
            verify_certificates: true,
            ca_cert_path: None,
        }
    }
}

impl SmtpConfig {
    /// `host:port`, as handed to the TCP connector.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Login for the relay. The password stays wrapped until an AUTH exchange
/// needs it.
pub struct SmtpCredentials {
    pub username: String,
    pub password: SecretString,
    /// Skip capability-based selection and use this mechanism.
    pub method: Option<SmtpAuthMethod>,
}

impl SmtpCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
            method: None,
        }
    }

    pub fn with_method(self, method: SmtpAuthMethod) -> Self {
        Self {
            method: Some(method),
            ..self
        }
    }

    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("method", &self.method)
            .finish()
    }
}

// ─── Addresses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Blank or missing names produce a bare address.
    pub fn with_optional_name(address: impl Into<String>, name: Option<&str>) -> Self {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => Self::with_name(address, n),
            None => Self::new(address),
        }
    }

    /// Header form: `addr`, `"Name" <addr>`, or an RFC 2047 encoded-word
    /// name for non-ASCII display names.
    pub fn to_mailbox(&self) -> String {
        let Some(name) = &self.name else {
            return self.address.clone();
        };
        if name.is_ascii() {
            format!("\"{}\" <{}>", name.replace('"', "\\\""), self.address)
        } else {
            format!("{} <{}>", crate::message::encode_header_value(name), self.address)
        }
    }

    /// Accepts `addr`, `<addr>` or `Name <addr>` (name optionally quoted).
    pub fn parse(input: &str) -> SmtpResult<Self> {
        let input = input.trim();
        let invalid = || SmtpError::message(format!("Invalid email address: {}", input));

        let Some(open) = input.find('<') else {
            let candidate = Self::new(input);
            return if candidate.address.contains('@') && !input.contains(char::is_whitespace) {
                Ok(candidate)
            } else {
                Err(invalid())
            };
        };
        let close = input.rfind('>').filter(|&c| c > open).ok_or_else(invalid)?;
        let address = input[open + 1..close].trim();
        if !address.contains('@') {
            return Err(invalid());
        }
        let name = input[..open].trim().trim_matches('"').trim();
        Ok(Self::with_optional_name(address, Some(name)))
    }

    /// Shape check only: `local@domain`, no whitespace or brackets.
    /// Dotless domains such as `localhost` are accepted.
    pub fn is_valid(&self) -> bool {
        let a = self.address.as_str();
        if a.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
            return false;
        }
        a.rsplit_once('@')
            .map(|(local, domain)| {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            })
            .unwrap_or(false)
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mailbox())
    }
}

// ─── Attachment ─────────────────────────────────────────────────────

/// A file carried as its own MIME part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Basename shown to the recipient.
    pub filename: String,
    pub content_type: String,
    pub data_base64: String,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    /// Load a file once, up front. Only the basename is kept and the
    /// content type comes from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> SmtpResult<Self> {
        let path = path.as_ref();
        let filename = match path.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => {
                return Err(SmtpError::config(format!(
                    "Attachment path has no file name: {}",
                    path.display()
                )))
            }
        };
        let data = std::fs::read(path).map_err(|e| {
            SmtpError::config(format!("Failed to read attachment {}: {}", path.display(), e))
        })?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        Ok(Self::new(filename, content_type.essence_str(), &data))
    }

    pub fn decode_data(&self) -> SmtpResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data_base64)
            .map_err(|e| SmtpError::message(format!("Attachment {} is not valid base64: {}", self.filename, e)))
    }
}

// ─── Message ────────────────────────────────────────────────────────

/// Everything that goes into one DATA payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Right-hand side of `Message-ID`, without angle brackets.
    pub id: String,
    pub from: EmailAddress,
    pub reply_to: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    /// Written as a header only, never an envelope recipient.
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Default for EmailMessage {
    fn default() -> Self {
        Self {
            id: format!("{}@massmail", uuid::Uuid::new_v4().simple()),
            from: EmailAddress::new(""),
            reply_to: None,
            to: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
        }
    }
}

impl EmailMessage {
    /// RCPT TO list. Only `to`: bcc addresses appear in the header, so a
    /// refused bcc mailbox can never fail the primary delivery.
    pub fn envelope_recipients(&self) -> Vec<&EmailAddress> {
        self.to.iter().collect()
    }

    /// Header text that would end the header line early.
    fn line_break_field(&self) -> Option<&'static str> {
        let breaks = |s: &str| s.contains(['\r', '\n']);
        let named = |a: &EmailAddress| a.name.as_deref().is_some_and(breaks);
        if breaks(&self.subject) {
            Some("Subject")
        } else if named(&self.from) {
            Some("From")
        } else if self.reply_to.as_ref().is_some_and(named) {
            Some("Reply-To")
        } else if self.to.iter().chain(&self.bcc).any(named) {
            Some("recipient")
        } else if self.attachments.iter().any(|a| breaks(&a.filename)) {
            Some("attachment filename")
        } else {
            None
        }
    }

    pub fn validate(&self) -> SmtpResult<()> {
        if !self.from.is_valid() {
            return Err(SmtpError::message(format!(
                "Invalid From address: {:?}",
                self.from.address
            )));
        }
        if self.to.is_empty() {
            return Err(SmtpError::message("At least one recipient is required"));
        }
        let bad = self
            .to
            .iter()
            .chain(&self.bcc)
            .chain(self.reply_to.as_ref())
            .find(|a| !a.is_valid());
        if let Some(addr) = bad {
            return Err(SmtpError::message(format!("Invalid address: {:?}", addr.address)));
        }
        if let Some(field) = self.line_break_field() {
            return Err(SmtpError::message(format!("{} contains a line break", field)));
        }
        if self.text_body.is_none() && self.html_body.is_none() {
            return Err(SmtpError::message("Message has no body"));
        }
        Ok(())
    }
}

// ─── Server replies ─────────────────────────────────────────────────

/// One complete (possibly multi-line) server reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpReply {
    pub code: u16,
    pub enhanced_code: Option<String>,
    /// Text after the code on each line.
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// 2xx
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx, the server wants more input.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// 4xx or 5xx
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    pub fn text(&self) -> String {
        self.lines.join("\r\n")
    }

    /// Convert into a `ServerReply` error that keeps both status codes.
    pub fn to_error(&self, context: &str) -> SmtpError {
        SmtpError {
            enhanced_code: self.enhanced_code.clone(),
            ..SmtpError::server(self.code, format!("{}: {}", context, self.text()))
        }
    }

    /// Parse the raw text of a reply. The first line's code wins and the
    /// enhanced status is taken from the first line that carries one.
    pub fn parse(raw: &str) -> SmtpResult<Self> {
        let mut code = None;
        let mut enhanced_code = None;
        let mut lines = Vec::new();

        for line in raw.lines().filter(|l| l.len() >= 3) {
            let this_code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::io(format!("Invalid reply code in: {}", line)))?;
            code.get_or_insert(this_code);

            let text = line.get(4..).unwrap_or_default();
            if enhanced_code.is_none() {
                enhanced_code = text
                    .split(' ')
                    .next()
                    .filter(|word| is_enhanced_status(word))
                    .map(str::to_string);
            }
            lines.push(text.to_string());
        }

        let code = code.ok_or_else(|| SmtpError::io("Empty SMTP reply"))?;
        Ok(Self {
            code,
            enhanced_code,
            lines,
        })
    }
}

/// `class.subject.detail`, each one to three digits.
fn is_enhanced_status(word: &str) -> bool {
    let mut parts = 0;
    for part in word.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// The parts of an EHLO reply a sender acts on.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EhloCapabilities {
    /// First line of the reply, usually the server's host name.
    pub server_name: String,
    /// Upper-cased mechanisms from every `AUTH` / `AUTH=` line.
    pub auth_mechanisms: Vec<String>,
    pub starttls: bool,
}

impl EhloCapabilities {
    pub fn parse(reply: &SmtpReply) -> Self {
        let mut lines = reply.lines.iter();
        let mut caps = Self {
            server_name: lines.next().cloned().unwrap_or_default(),
            ..Self::default()
        };
        for line in lines {
            let line = line.to_ascii_uppercase();
            let (keyword, params) = line.split_once([' ', '=']).unwrap_or((line.as_str(), ""));
            match keyword {
                "STARTTLS" => caps.starttls = true,
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if !caps.auth_mechanisms.iter().any(|m| m == mech) {
                            caps.auth_mechanisms.push(mech.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        caps
    }

    pub fn supports_auth(&self, method: SmtpAuthMethod) -> bool {
        self.auth_mechanisms.iter().any(|m| m == method.keyword())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(lines: &[&str]) -> SmtpReply {
        SmtpReply {
            code: 250,
            enhanced_code: None,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SmtpError::connection("timeout").to_string(),
            "[SMTP] ConnectionError: timeout"
        );
        assert_eq!(
            SmtpError::server(550, "Mailbox not found").to_string(),
            "[SMTP 550] ServerReply: Mailbox not found"
        );
    }

    #[test]
    fn transport_errors_are_classified() {
        assert!(SmtpError::io("reset").is_transport());
        assert!(SmtpError::tls("handshake").is_transport());
        assert!(SmtpError::connection("refused").is_transport());
        assert!(!SmtpError::server(550, "no such user").is_transport());
        assert!(!SmtpError::auth("535").is_transport());
        assert!(!SmtpError::message("bad address").is_transport());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = SmtpCredentials::new("user@example.com", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("user@example.com"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(creds.password(), "hunter2");
    }

    #[test]
    fn mailbox_formatting() {
        assert_eq!(EmailAddress::new("bob@example.com").to_mailbox(), "bob@example.com");
        assert_eq!(
            EmailAddress::with_name("bob@example.com", "Bob \"B\" Smith").to_mailbox(),
            "\"Bob \\\"B\\\" Smith\" <bob@example.com>"
        );
        let encoded = EmailAddress::with_name("ivan@example.com", "Иван").to_mailbox();
        assert!(encoded.starts_with("=?UTF-8?B?"));
        assert!(encoded.ends_with("?= <ivan@example.com>"));
    }

    #[test]
    fn optional_name_ignores_blank() {
        assert_eq!(EmailAddress::with_optional_name("a@b.com", Some("  ")).name, None);
        assert_eq!(EmailAddress::with_optional_name("a@b.com", None).name, None);
        assert_eq!(
            EmailAddress::with_optional_name("a@b.com", Some(" Ann ")).name.as_deref(),
            Some("Ann")
        );
    }

    #[test]
    fn parse_address_forms() {
        let a = EmailAddress::parse("\"Alice\" <alice@example.com>").unwrap();
        assert_eq!(a.name.as_deref(), Some("Alice"));
        assert_eq!(a.address, "alice@example.com");

        let b = EmailAddress::parse(" bob@example.com ").unwrap();
        assert_eq!(b, EmailAddress::new("bob@example.com"));

        let c = EmailAddress::parse("<carol@example.com>").unwrap();
        assert_eq!(c.name, None);

        assert!(EmailAddress::parse("not-an-email").is_err());
        assert!(EmailAddress::parse("two words@example.com").is_err());
        assert!(EmailAddress::parse("Dan <dan.example.com>").is_err());
        assert!(EmailAddress::parse("Eve >eve@example.com<").is_err());
    }

    #[test]
    fn address_shape_check() {
        assert!(EmailAddress::new("a@b.com").is_valid());
        assert!(!EmailAddress::new("noatsign").is_valid());
        assert!(!EmailAddress::new("@example.com").is_valid());
        assert!(EmailAddress::new("root@localhost").is_valid());
        assert!(EmailAddress::new("ops@intranet").is_valid());
        assert!(!EmailAddress::new("a@").is_valid());
        assert!(!EmailAddress::new("a@.com").is_valid());
        assert!(!EmailAddress::new("a@example.com.").is_valid());
        assert!(!EmailAddress::new("a b@c.com").is_valid());
    }

    #[test]
    fn attachment_from_path_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let att = Attachment::from_path(&path).unwrap();
        assert_eq!(att.filename, "report.pdf");
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.decode_data().unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn attachment_unknown_extension_is_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.zzzunknown");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let att = Attachment::from_path(&path).unwrap();
        assert_eq!(att.content_type, "application/octet-stream");
    }

    #[test]
    fn attachment_from_missing_path() {
        let err = Attachment::from_path("/definitely/not/here.txt").unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::ConfigError);
        assert!(err.message.contains("/definitely/not/here.txt"));
    }

    #[test]
    fn message_validation() {
        let mut msg = EmailMessage::default();
        assert!(msg.validate().is_err());

        msg.from = EmailAddress::new("a@b.com");
        msg.text_body = Some("hi".into());
        assert!(msg.validate().is_err(), "no recipients");

        msg.to.push(EmailAddress::new("b@c.com"));
        assert!(msg.validate().is_ok());

        msg.reply_to = Some(EmailAddress::new("nope"));
        assert!(msg.validate().is_err());
        msg.reply_to = None;

        msg.bcc.push(EmailAddress::new("broken"));
        assert!(msg.validate().is_err());
        msg.bcc.clear();

        msg.text_body = None;
        assert!(msg.validate().is_err(), "no body");
    }

    #[test]
    fn envelope_leaves_out_bcc() {
        let mut msg = EmailMessage::default();
        msg.to.push(EmailAddress::new("a@x.com"));
        msg.bcc.push(EmailAddress::new("c@x.com"));
        let rcpts: Vec<&str> = msg
            .envelope_recipients()
            .into_iter()
            .map(|a| a.address.as_str())
            .collect();
        assert_eq!(rcpts, ["a@x.com"]);
    }

    #[test]
    fn line_breaks_in_header_text_are_refused() {
        let base = || EmailMessage {
            from: EmailAddress::new("a@b.com"),
            to: vec![EmailAddress::new("c@d.com")],
            text_body: Some("body".into()),
            ..EmailMessage::default()
        };
        assert!(base().validate().is_ok());

        let mut msg = base();
        msg.subject = "Hi\r\nX-Injected: yes".into();
        let err = msg.validate().unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::MessageError);
        assert!(err.message.contains("Subject"));

        let mut msg = base();
        msg.from = EmailAddress::with_name("a@b.com", "Sales\nBcc: victim@x.com");
        assert!(msg.validate().is_err());

        let mut msg = base();
        msg.reply_to = Some(EmailAddress::with_name("r@b.com", "Help\r"));
        assert!(msg.validate().is_err());

        let mut msg = base();
        msg.attachments.push(Attachment::new("a\nb.txt", "text/plain", b"x"));
        assert!(msg.validate().is_err());
    }

    #[test]
    fn reply_parse_multiline() {
        let r = SmtpReply::parse("250-mail.example.com\r\n250-SIZE 52428800\r\n250 STARTTLS").unwrap();
        assert_eq!(r.code, 250);
        assert_eq!(r.lines, ["mail.example.com", "SIZE 52428800", "STARTTLS"]);
        assert!(r.is_positive());
    }

    #[test]
    fn reply_enhanced_status() {
        let r = SmtpReply::parse("550 5.1.1 User unknown").unwrap();
        assert!(r.is_error());
        let err = r.to_error("RCPT TO rejected");
        assert_eq!(err.kind, SmtpErrorKind::ServerReply);
        assert_eq!(err.code, Some(550));
        assert_eq!(err.enhanced_code.as_deref(), Some("5.1.1"));

        assert_eq!(SmtpReply::parse("250 OK").unwrap().enhanced_code, None);
        assert_eq!(SmtpReply::parse("250 1.2").unwrap().enhanced_code, None);
        assert!(SmtpReply::parse("354 go ahead").unwrap().is_intermediate());
    }

    #[test]
    fn reply_garbage_is_rejected() {
        assert!(SmtpReply::parse("").is_err());
        assert!(SmtpReply::parse("abc hello").is_err());
    }

    #[test]
    fn ehlo_capabilities() {
        let caps = EhloCapabilities::parse(&reply(&[
            "mail.example.com",
            "SIZE 52428800",
            "auth PLAIN LOGIN",
            "AUTH=LOGIN CRAM-MD5",
            "STARTTLS",
        ]));
        assert_eq!(caps.server_name, "mail.example.com");
        assert!(caps.starttls);
        assert_eq!(caps.auth_mechanisms, ["PLAIN", "LOGIN", "CRAM-MD5"]);
        assert!(caps.supports_auth(SmtpAuthMethod::CramMd5));

        let bare = EhloCapabilities::parse(&reply(&["relay"]));
        assert!(!bare.starttls);
        assert!(!bare.supports_auth(SmtpAuthMethod::Plain));
    }

    #[test]
    fn defaults_and_display() {
        let cfg = SmtpConfig::default();
        assert_eq!(cfg.port, 25);
        assert_eq!(cfg.security, SmtpSecurity::None);
        assert_eq!(cfg.connect_timeout_secs, None);
        assert_eq!(cfg.io_timeout_secs, None);
        assert!(cfg.verify_certificates);
        assert_eq!(cfg.address(), ":25");
        assert_eq!(SmtpSecurity::ImplicitTls.to_string(), "implicit-tls");
        assert_eq!(SmtpAuthMethod::CramMd5.to_string(), "CRAM-MD5");
    }
}
