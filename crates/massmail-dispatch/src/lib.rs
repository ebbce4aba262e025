//! **massmail-dispatch**: distributes a recipient list over a pool of
//! concurrent mail sessions.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`randomize`] | Alternative-group template rendering |
//! | [`queue`] | Shared multi-consumer recipient queue |
//! | [`config`] | Immutable per-run worker configuration |
//! | [`transport`] | `Connector` / `Transport` seam over mail sessions |
//! | [`worker`] | One worker: open a session, drain the queue |
//! | [`dispatcher`] | Spawn, join and summarize the pool |
//! | [`error`] | Template and configuration errors |

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod randomize;
pub mod transport;
pub mod worker;

pub use config::{SendFailurePolicy, WorkerConfig};
pub use dispatcher::{effective_worker_count, DispatchSummary, Dispatcher};
pub use error::{ConfigError, TemplateError};
pub use queue::RecipientQueue;
pub use transport::{Connector, SmtpConnector, Transport};
pub use worker::{RecipientFailure, Worker, WorkerOutcome, WorkerReport};
