//! A worker drains the shared queue through its own mail session.

use std::sync::Arc;

use massmail_smtp::OutgoingMail;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::{SendFailurePolicy, WorkerConfig};
use crate::queue::RecipientQueue;
use crate::randomize;
use crate::transport::{Connector, Transport};

/// One recipient that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    pub worker_id: usize,
    pub recipient: String,
    pub error: String,
    /// SMTP reply code, when the server gave one.
    pub code: Option<u16>,
}

/// How a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// The queue ran dry.
    Drained,
    /// The session never opened; nothing was popped.
    SessionFailed { error: String },
    /// A send failed and the policy stopped the worker.
    Aborted { recipient: String, error: String },
    /// The connection broke during a send.
    SessionLost { recipient: String, error: String },
}

impl WorkerOutcome {
    pub fn is_session_failure(&self) -> bool {
        matches!(self, Self::SessionFailed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub outcome: WorkerOutcome,
    pub delivered: Vec<String>,
    pub failures: Vec<RecipientFailure>,
}

impl WorkerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Drained,
            delivered: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Report for a worker task that died before it could report.
    pub(crate) fn crashed(worker_id: usize, error: impl Into<String>) -> Self {
        Self {
            outcome: WorkerOutcome::SessionFailed {
                error: error.into(),
            },
            ..Self::new(worker_id)
        }
    }
}

/// Constructing a worker does nothing; [`Worker::spawn`] starts it.
pub struct Worker<C: Connector> {
    id: usize,
    queue: RecipientQueue,
    connector: Arc<C>,
    config: Arc<WorkerConfig>,
    span: Span,
}

impl<C: Connector> Worker<C> {
    /// `parent` is the span worker events are recorded under.
    pub fn new(
        id: usize,
        queue: RecipientQueue,
        connector: Arc<C>,
        config: Arc<WorkerConfig>,
        parent: &Span,
    ) -> Self {
        let span = info_span!(parent: parent, "worker", worker_id = id);
        Self {
            id,
            queue,
            connector,
            config,
            span,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run on the tokio runtime inside the worker's span.
    pub fn spawn(self) -> JoinHandle<WorkerReport> {
        let span = self.span.clone();
        tokio::spawn(self.run().instrument(span))
    }

    /// Open a session, then pop, render and send until the queue is empty
    /// or a failure stops the worker. A failed address is never re-queued.
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::new(self.id);

        let mut session = match self.connector.open(self.id, &self.config).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "could not open mail session");
                report.outcome = WorkerOutcome::SessionFailed {
                    error: e.to_string(),
                };
                return report;
            }
        };
        debug!("mail session open");

        let config = &self.config;
        let sender = config.sender();

        while let Some(recipient) = self.queue.pop_or_empty() {
            let mail = OutgoingMail {
                sender: &sender,
                recipient: &recipient,
                subject: randomize::render(&config.subject_template),
                body: randomize::render(&config.body_template),
                as_html: config.as_html,
                reply_to: config.reply_to.as_ref(),
                bcc: &config.bcc,
                attachments: &config.attachments,
            };

            match session.send(&mail).await {
                Ok(()) => {
                    debug!(recipient = %recipient, "delivered");
                    report.delivered.push(recipient);
                }
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "delivery failed");
                    report.failures.push(RecipientFailure {
                        worker_id: self.id,
                        recipient: recipient.clone(),
                        error: e.to_string(),
                        code: e.code,
                    });

                    if !session.is_open() {
                        report.outcome = WorkerOutcome::SessionLost {
                            recipient,
                            error: e.to_string(),
                        };
                        break;
                    }
                    if config.failure_policy == SendFailurePolicy::AbortWorker {
                        report.outcome = WorkerOutcome::Aborted {
                            recipient,
                            error: e.to_string(),
                        };
                        break;
                    }
                }
            }
        }

        session.close().await;
        info!(
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "worker finished"
        );
        report
    }
}
