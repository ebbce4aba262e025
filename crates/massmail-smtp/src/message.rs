//! Message construction.
//!
//! [`build_message`] serialises an [`EmailMessage`] into the DATA payload.
//! [`OutgoingMail::compose`] is what a session calls per recipient: it
//! assembles the message and pairs it with the SMTP envelope.

use base64::Engine;
use chrono::Utc;

use crate::types::*;

/// Base64 and quoted-printable line limit (RFC 2045 §6.7, §6.8).
const LINE_LIMIT: usize = 76;

/// UTF-8 bytes per encoded-word. 45 bytes are 60 base64 characters, so
/// with `=?UTF-8?B?` and `?=` a word stays under 75 (RFC 2047 §2).
const ENCODED_WORD_BYTES: usize = 45;

/// Accumulates header lines and MIME parts with CRLF line endings.
struct MimeWriter {
    out: String,
    boundary: String,
}

impl MimeWriter {
    fn new(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity),
            boundary: format!("=_massmail_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    fn header(&mut self, name: &str, value: &str) {
        self.out.push_str(name);
        self.out.push_str(": ");
        self.out.push_str(value);
        self.out.push_str("\r\n");
    }

    fn blank_line(&mut self) {
        self.out.push_str("\r\n");
    }

    fn start_part(&mut self) {
        self.out.push_str("\r\n--");
        self.out.push_str(&self.boundary);
        self.out.push_str("\r\n");
    }

    fn finish(mut self) -> String {
        self.out.push_str("\r\n--");
        self.out.push_str(&self.boundary);
        self.out.push_str("--\r\n");
        self.out
    }
}

/// Serialise a message. The result is always `multipart/mixed` with the
/// body as the first part and one base64 part per attachment.
pub fn build_message(msg: &EmailMessage) -> SmtpResult<String> {
    msg.validate()?;

    let attached: usize = msg
        .attachments
        .iter()
        .map(|a| a.data_base64.len() + a.data_base64.len() / LINE_LIMIT * 2)
        .sum();
    let mut w = MimeWriter::new(attached + 4096);

    w.header("Message-ID", &format!("<{}>", msg.id));
    w.header("Date", &Utc::now().to_rfc2822());
    w.header("From", &msg.from.to_mailbox());
    w.header("To", &mailbox_list(&msg.to));
    if let Some(reply_to) = &msg.reply_to {
        w.header("Reply-To", &reply_to.to_mailbox());
    }
    if !msg.bcc.is_empty() {
        w.header("Bcc", &mailbox_list(&msg.bcc));
    }
    w.header("Subject", &encode_header_value(&msg.subject));
    w.header("MIME-Version", "1.0");
    let content_type = format!("multipart/mixed; boundary=\"{}\"", w.boundary);
    w.header("Content-Type", &content_type);
    w.blank_line();
    w.out.push_str("This is a multi-part message in MIME format.\r\n");

    let (subtype, body) = match (&msg.html_body, &msg.text_body) {
        (Some(html), _) => ("html", html.as_str()),
        (None, text) => ("plain", text.as_deref().unwrap_or_default()),
    };
    w.start_part();
    w.header("Content-Type", &format!("text/{}; charset=\"UTF-8\"", subtype));
    w.header("Content-Transfer-Encoding", "quoted-printable");
    w.blank_line();
    w.out.push_str(&quoted_printable::encode_to_str(body.as_bytes()));
    w.blank_line();

    for att in &msg.attachments {
        w.start_part();
        // Plain quoted parameter only: the RFC 6266 `filename*=` form is
        // refused by some providers.
        let filename = att.filename.replace('"', "");
        w.header("Content-Type", &format!("{}; name=\"{}\"", att.content_type, filename));
        w.header("Content-Disposition", &format!("attachment; filename=\"{}\"", filename));
        w.header("Content-Transfer-Encoding", "base64");
        w.blank_line();
        for line in wrap(&att.data_base64) {
            w.out.push_str(line);
            w.out.push_str("\r\n");
        }
    }

    Ok(w.finish())
}

fn mailbox_list(addrs: &[EmailAddress]) -> String {
    let mut list = String::new();
    for (i, addr) in addrs.iter().enumerate() {
        if i > 0 {
            list.push_str(", ");
        }
        list.push_str(&addr.to_mailbox());
    }
    list
}

/// Split ASCII text into lines of at most [`LINE_LIMIT`] characters.
fn wrap(ascii: &str) -> impl Iterator<Item = &str> {
    let mut rest = ascii;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let (line, tail) = rest.split_at(rest.len().min(LINE_LIMIT));
        rest = tail;
        Some(line)
    })
}

/// RFC 2047 `B` encoding for non-ASCII header text; ASCII passes through.
/// Long values become several encoded-words joined by folding whitespace,
/// each cut on a character boundary.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let b64 = base64::engine::general_purpose::STANDARD;
    let mut words = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut cut = rest.len().min(ENCODED_WORD_BYTES);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (chunk, tail) = rest.split_at(cut);
        words.push(format!("=?UTF-8?B?{}?=", b64.encode(chunk)));
        rest = tail;
    }
    words.join("\r\n ")
}

// ── Builder ─────────────────────────────────────────────────────────

/// Fluent construction of an [`EmailMessage`]; `build` validates it.
#[derive(Default)]
pub struct MessageBuilder {
    msg: EmailMessage,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(self, from: EmailAddress) -> Self {
        self.with(|m| m.from = from)
    }

    pub fn reply_to(self, reply_to: EmailAddress) -> Self {
        self.with(|m| m.reply_to = Some(reply_to))
    }

    pub fn to(self, to: EmailAddress) -> Self {
        self.with(|m| m.to.push(to))
    }

    pub fn bcc(self, bcc: EmailAddress) -> Self {
        self.with(|m| m.bcc.push(bcc))
    }

    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.with(|m| m.subject = subject.into())
    }

    /// Plain-text body. Replaces any HTML body.
    pub fn text(self, body: impl Into<String>) -> Self {
        self.with(|m| {
            m.text_body = Some(body.into());
            m.html_body = None;
        })
    }

    /// HTML body. Replaces any plain-text body.
    pub fn html(self, body: impl Into<String>) -> Self {
        self.with(|m| {
            m.html_body = Some(body.into());
            m.text_body = None;
        })
    }

    pub fn attachment(self, attachment: Attachment) -> Self {
        self.with(|m| m.attachments.push(attachment))
    }

    pub fn build(self) -> SmtpResult<EmailMessage> {
        self.msg.validate().map(|()| self.msg)
    }

    fn with(mut self, edit: impl FnOnce(&mut EmailMessage)) -> Self {
        edit(&mut self.msg);
        self
    }
}

// ── Per-recipient composition ───────────────────────────────────────

/// One personalised mail for one recipient. Subject and body are already
/// rendered; everything else is borrowed from the run's shared settings.
#[derive(Debug, Clone)]
pub struct OutgoingMail<'a> {
    pub sender: &'a EmailAddress,
    pub recipient: &'a str,
    pub subject: String,
    pub body: String,
    pub as_html: bool,
    pub reply_to: Option<&'a EmailAddress>,
    pub bcc: &'a [EmailAddress],
    pub attachments: &'a [Attachment],
}

/// What goes on the wire: MAIL FROM, the RCPT TO list and the DATA payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub recipients: Vec<String>,
    pub data: String,
}

impl OutgoingMail<'_> {
    /// The envelope names exactly one recipient. Bcc addresses are only
    /// listed in the header.
    pub fn compose(&self) -> SmtpResult<Envelope> {
        let builder = MessageBuilder::new()
            .from(self.sender.clone())
            .to(EmailAddress::new(self.recipient.trim()))
            .subject(self.subject.as_str());
        let builder = if self.as_html {
            builder.html(self.body.as_str())
        } else {
            builder.text(self.body.as_str())
        };
        let builder = self.bcc.iter().cloned().fold(builder, MessageBuilder::bcc);
        let builder = self
            .attachments
            .iter()
            .cloned()
            .fold(builder, MessageBuilder::attachment);
        let msg = match self.reply_to {
            Some(reply_to) => builder.reply_to(reply_to.clone()),
            None => builder,
        }
        .build()?;

        Ok(Envelope {
            from: msg.from.address.clone(),
            recipients: msg
                .envelope_recipients()
                .into_iter()
                .map(|a| a.address.clone())
                .collect(),
            data: build_message(&msg)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        MessageBuilder::new()
            .from(EmailAddress::new("sender@example.com"))
            .to(EmailAddress::new("rcpt@example.com"))
            .subject("Quarterly numbers")
            .text("Hello, world!")
            .build()
            .unwrap()
    }

    fn mail<'a>(sender: &'a EmailAddress, recipient: &'a str) -> OutgoingMail<'a> {
        OutgoingMail {
            sender,
            recipient,
            subject: "Hi".into(),
            body: "Body".into(),
            as_html: false,
            reply_to: None,
            bcc: &[],
            attachments: &[],
        }
    }

    #[test]
    fn plain_text_layout() {
        let raw = build_message(&message()).unwrap();
        assert!(raw.contains("From: sender@example.com\r\n"));
        assert!(raw.contains("To: rcpt@example.com\r\n"));
        assert!(raw.contains("Subject: Quarterly numbers\r\n"));
        assert!(raw.contains("MIME-Version: 1.0\r\n"));
        assert!(raw.contains("Content-Type: multipart/mixed; boundary=\""));
        assert!(raw.contains("Content-Type: text/plain; charset=\"UTF-8\"\r\n"));
        assert!(raw.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(!raw.contains("Bcc:"));
        assert!(!raw.contains("Reply-To:"));
        assert!(raw.ends_with("--\r\n"));
    }

    #[test]
    fn headers_come_before_the_first_part() {
        let raw = build_message(&message()).unwrap();
        let (head, _) = raw.split_once("\r\n\r\n").unwrap();
        assert!(head.contains("Message-ID: <"));
        assert!(head.contains("Date: "));
        assert!(!head.contains("text/plain"));
    }

    #[test]
    fn html_body() {
        let mut msg = message();
        msg.text_body = None;
        msg.html_body = Some("<h1>Hello</h1>".into());
        let raw = build_message(&msg).unwrap();
        assert!(raw.contains("text/html"));
        assert!(!raw.contains("text/plain"));
    }

    #[test]
    fn reply_to_and_bcc_headers() {
        let mut msg = message();
        msg.reply_to = Some(EmailAddress::with_name("reply@example.com", "Support"));
        msg.bcc.push(EmailAddress::new("audit@example.com"));
        msg.bcc.push(EmailAddress::new("boss@example.com"));
        let raw = build_message(&msg).unwrap();
        assert!(raw.contains("Reply-To: \"Support\" <reply@example.com>\r\n"));
        assert!(raw.contains("Bcc: audit@example.com, boss@example.com\r\n"));
    }

    #[test]
    fn invalid_message_is_refused() {
        let mut msg = message();
        msg.to.clear();
        assert!(build_message(&msg).is_err());
    }

    #[test]
    fn attachment_filename_is_not_percent_encoded() {
        let mut msg = message();
        msg.attachments
            .push(Attachment::new("отчёт \"2024\".pdf", "application/pdf", b"PDF"));
        let raw = build_message(&msg).unwrap();
        assert!(raw.contains("Content-Disposition: attachment; filename=\"отчёт 2024.pdf\"\r\n"));
        assert!(raw.contains("Content-Type: application/pdf; name=\"отчёт 2024.pdf\"\r\n"));
        assert!(!raw.contains("filename*="));
    }

    #[test]
    fn long_attachment_is_wrapped() {
        let mut msg = message();
        msg.attachments
            .push(Attachment::new("zeros.bin", "application/octet-stream", &[0u8; 1000]));
        let raw = build_message(&msg).unwrap();
        let part = raw
            .split("Content-Transfer-Encoding: base64\r\n\r\n")
            .nth(1)
            .unwrap();
        let body: Vec<&str> = part.lines().take_while(|l| !l.is_empty()).collect();
        assert!(body.iter().all(|l| l.len() <= LINE_LIMIT));
        let joined: String = body.concat();
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(joined).unwrap(),
            vec![0u8; 1000]
        );
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        let mut msg = message();
        msg.subject = "Привет".into();
        let raw = build_message(&msg).unwrap();
        assert!(raw.contains("Subject: =?UTF-8?B?"));
        assert_eq!(encode_header_value("Hello"), "Hello");
    }

    #[test]
    fn long_subject_is_split_into_folded_words() {
        let subject = "Ежеквартальный отчёт о продажах: ".repeat(4);
        let folded = encode_header_value(&subject);
        let words: Vec<&str> = folded.split("\r\n ").collect();
        assert!(words.len() > 1);

        let mut decoded = Vec::new();
        for word in &words {
            assert!(word.len() <= 75, "{} is too long", word);
            let inner = word
                .strip_prefix("=?UTF-8?B?")
                .and_then(|w| w.strip_suffix("?="))
                .unwrap();
            let bytes = base64::engine::general_purpose::STANDARD.decode(inner).unwrap();
            assert!(std::str::from_utf8(&bytes).is_ok(), "word split a character");
            decoded.extend(bytes);
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), subject);
    }

    #[test]
    fn wrap_splits_at_the_limit() {
        let text = "a".repeat(LINE_LIMIT * 2 + 3);
        let lines: Vec<usize> = wrap(&text).map(str::len).collect();
        assert_eq!(lines, [LINE_LIMIT, LINE_LIMIT, 3]);
        assert_eq!(wrap("").count(), 0);
    }

    #[test]
    fn body_is_quoted_printable() {
        let mut msg = message();
        msg.text_body = Some("Здравствуй".into());
        let raw = build_message(&msg).unwrap();
        let (_, body) = raw.split_once("quoted-printable\r\n\r\n").unwrap();
        let line = body.lines().next().unwrap();
        assert!(line.is_ascii());
        let decoded = quoted_printable::decode(line, quoted_printable::ParseMode::Strict).unwrap();
        assert_eq!(decoded, "Здравствуй".as_bytes());
    }

    #[test]
    fn builder_keeps_one_body_kind() {
        let msg = MessageBuilder::new()
            .from(EmailAddress::new("a@b.com"))
            .to(EmailAddress::new("c@d.com"))
            .text("plain")
            .html("<b>html</b>")
            .build()
            .unwrap();
        assert!(msg.text_body.is_none());
        assert_eq!(msg.html_body.as_deref(), Some("<b>html</b>"));
    }

    #[test]
    fn compose_keeps_bcc_out_of_the_envelope() {
        let sender = EmailAddress::with_name("me@example.com", "Me");
        let bcc = [EmailAddress::new("copy@example.com")];
        let env = OutgoingMail {
            bcc: &bcc,
            ..mail(&sender, " you@example.com ")
        }
        .compose()
        .unwrap();
        assert_eq!(env.from, "me@example.com");
        assert_eq!(env.recipients, ["you@example.com"]);
        assert!(env.data.contains("Bcc: copy@example.com\r\n"));
        assert!(env.data.contains("From: \"Me\" <me@example.com>\r\n"));
        assert!(env.data.contains("To: you@example.com\r\n"));
    }

    #[test]
    fn compose_refuses_header_injection() {
        let sender = EmailAddress::new("me@example.com");
        let err = OutgoingMail {
            subject: "Hi\r\nX-Injected: yes".into(),
            ..mail(&sender, "you@example.com")
        }
        .compose()
        .unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::MessageError);
    }

    #[test]
    fn compose_refuses_bad_recipient() {
        let sender = EmailAddress::new("me@example.com");
        let err = mail(&sender, "not an address").compose().unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::MessageError);
    }
}
