//! **massmail-smtp**: SMTP client used by the bulk sender.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data types, error handling, configuration |
//! | [`client`] | Low-level SMTP protocol engine (EHLO, STARTTLS, DATA) |
//! | [`auth`] | SMTP authentication mechanisms (PLAIN, LOGIN, CRAM-MD5) |
//! | [`message`] | MIME message builder and per-recipient envelope composition |
//! | [`session`] | One authenticated connection with an explicit lifecycle |

pub mod auth;
pub mod client;
pub mod message;
pub mod session;
pub mod types;

pub use message::{Envelope, MessageBuilder, OutgoingMail};
pub use session::{MailSession, SessionState};
pub use types::*;
