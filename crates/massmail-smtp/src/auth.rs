//! SMTP AUTH: PLAIN, LOGIN and CRAM-MD5.

use base64::Engine;
use hmac::{Hmac, Mac};
use log::debug;

use crate::client::SmtpClient;
use crate::types::*;

type HmacMd5 = Hmac<md5::Md5>;

/// Strongest first.
const PREFERENCE: [SmtpAuthMethod; 3] = [
    SmtpAuthMethod::CramMd5,
    SmtpAuthMethod::Plain,
    SmtpAuthMethod::Login,
];

/// Log in on an open connection. An explicit `creds.method` wins over
/// whatever the EHLO reply advertised.
pub async fn authenticate(client: &mut SmtpClient, creds: &SmtpCredentials) -> SmtpResult<()> {
    let method = select_auth_method(client.capabilities(), creds.method);
    debug!("Authenticating as {} with {}", creds.username, method);

    let reply = match method {
        SmtpAuthMethod::Plain => auth_plain(client, creds).await?,
        SmtpAuthMethod::Login => auth_login(client, creds).await?,
        SmtpAuthMethod::CramMd5 => auth_cram_md5(client, creds).await?,
    };
    if !reply.is_positive() {
        return Err(rejected(method, "credentials", &reply));
    }
    Ok(())
}

/// Servers that list no usable mechanism still get a PLAIN attempt.
fn select_auth_method(
    caps: Option<&EhloCapabilities>,
    explicit: Option<SmtpAuthMethod>,
) -> SmtpAuthMethod {
    explicit
        .or_else(|| {
            let caps = caps?;
            PREFERENCE.into_iter().find(|m| caps.supports_auth(*m))
        })
        .unwrap_or(SmtpAuthMethod::Plain)
}

fn rejected(method: SmtpAuthMethod, step: &str, reply: &SmtpReply) -> SmtpError {
    SmtpError::auth(format!(
        "AUTH {} {} rejected: {} {}",
        method,
        step,
        reply.code,
        reply.text()
    ))
    .with_code(reply.code)
}

/// Send one base64 line and expect a 334 continuation back.
async fn continue_with(
    client: &mut SmtpClient,
    method: SmtpAuthMethod,
    step: &str,
    line: &str,
) -> SmtpResult<SmtpReply> {
    let reply = client.command_sensitive(line).await?;
    if reply.is_intermediate() {
        Ok(reply)
    } else {
        Err(rejected(method, step, &reply))
    }
}

/// `AUTH PLAIN <base64(\0user\0pass)>` in a single round trip.
async fn auth_plain(client: &mut SmtpClient, creds: &SmtpCredentials) -> SmtpResult<SmtpReply> {
    let payload = build_plain_payload(&creds.username, creds.password());
    client.command_sensitive(&format!("AUTH PLAIN {}", payload)).await
}

async fn auth_login(client: &mut SmtpClient, creds: &SmtpCredentials) -> SmtpResult<SmtpReply> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let method = SmtpAuthMethod::Login;
    continue_with(client, method, "mechanism", "AUTH LOGIN").await?;
    continue_with(client, method, "username", &b64.encode(&creds.username)).await?;
    client.command_sensitive(&b64.encode(creds.password())).await
}

async fn auth_cram_md5(client: &mut SmtpClient, creds: &SmtpCredentials) -> SmtpResult<SmtpReply> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let challenge = continue_with(client, SmtpAuthMethod::CramMd5, "mechanism", "AUTH CRAM-MD5").await?;
    let challenge = b64
        .decode(challenge.text().trim())
        .map_err(|e| SmtpError::auth(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

    let digest = cram_md5_digest(creds.password(), &challenge)?;
    let response = format!("{} {}", creds.username, digest);
    client.command_sensitive(&b64.encode(response)).await
}

/// Lower-case hex HMAC-MD5 of the challenge, keyed with the password.
fn cram_md5_digest(password: &str, challenge: &[u8]) -> SmtpResult<String> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes())
        .map_err(|e| SmtpError::auth(format!("CRAM-MD5 key error: {}", e)))?;
    mac.update(challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn build_plain_payload(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("\0{}\0{}", username, password))
}
